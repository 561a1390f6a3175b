use anyhow::Result;
use normq::protocol::{FileTask, Request};
use normq::{
    run, Dispatcher, DisplayMode, FileScanner, MemoryTransport, ResultSink, RunRequest,
};
use std::fs;
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

fn plain_sink(dir: &TempDir) -> (Arc<ResultSink>, Capture) {
    let capture = Capture::default();
    let sink = ResultSink::new(Box::new(capture.clone()), DisplayMode::Plain, dir.path());
    (Arc::new(sink), capture)
}

fn create_sources(dir: &TempDir, count: usize) -> Result<Vec<std::path::PathBuf>> {
    let mut paths = Vec::new();
    for i in 0..count {
        let path = dir.path().join(format!("file_{i:02}.c"));
        fs::write(&path, format!("int f{i}(void);\n"))?;
        paths.push(path);
    }
    Ok(paths)
}

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

/// Replies with a stop signal for files whose name ends with `trigger`
fn stopping_on(trigger: &'static str) -> MemoryTransport {
    MemoryTransport::new(move |request| {
        let reply = match request {
            Request::File(task) if task.filename.ends_with(trigger) => serde_json::json!({
                "filename": task.filename,
                "display": "Server is shutting down",
                "stop": true,
            }),
            Request::File(task) => serde_json::json!({
                "filename": task.filename,
                "display": "OK!",
            }),
            Request::Control { .. } => serde_json::json!({ "display": "control" }),
        };
        reply.to_string().into_bytes()
    })
}

#[test]
fn test_backpressure_bound() -> Result<()> {
    let dir = tempdir()?;
    let (sink, _capture) = plain_sink(&dir);
    let transport = MemoryTransport::echo().with_batch_size(1).newest_first();
    let mut dispatcher = Dispatcher::new(transport, Arc::clone(&sink), capacity(4));

    let mut peak = 0;
    for i in 0..10 {
        dispatcher.submit(FileTask {
            filename: format!("/proj/{i}.c"),
            content: String::new(),
            rules: vec![],
        })?;
        peak = peak.max(dispatcher.in_flight());
        dispatcher.throttle()?;
        assert!(
            dispatcher.in_flight() < 4,
            "in flight {} after throttle",
            dispatcher.in_flight()
        );
    }
    assert_eq!(peak, 4);

    dispatcher.drain()?;
    assert_eq!(dispatcher.in_flight(), 0);
    assert_eq!(sink.replies_handled(), 10);
    assert_eq!(dispatcher.transport().published().len(), 10);
    Ok(())
}

#[test]
fn test_drain_completeness_with_reordered_replies() -> Result<()> {
    let dir = tempdir()?;
    let files = create_sources(&dir, 10)?;
    let (sink, capture) = plain_sink(&dir);
    let transport = MemoryTransport::echo().with_batch_size(3).newest_first();
    let mut dispatcher = Dispatcher::new(transport, Arc::clone(&sink), capacity(4));

    dispatcher.dispatch_files(&files, &["CheckDefine".to_string()])?;
    dispatcher.drain()?;

    assert_eq!(dispatcher.in_flight(), 0);
    assert_eq!(sink.replies_handled(), 10);

    let output = capture.text();
    for i in 0..10 {
        let line = format!("Norme: file_{i:02}.c\n");
        assert_eq!(output.matches(&line).count(), 1, "missing {line:?}");
    }

    let published = dispatcher.transport().published();
    let first: Request = serde_json::from_slice(&published[0].body)?;
    match first {
        Request::File(task) => {
            assert_eq!(task.filename, files[0].to_string_lossy());
            assert_eq!(task.content, "int f0(void);\n");
            assert_eq!(task.rules, vec!["CheckDefine"]);
        }
        other => panic!("unexpected request {other:?}"),
    }
    Ok(())
}

#[test]
fn test_stop_drains_outstanding_replies() -> Result<()> {
    let dir = tempdir()?;
    let files = create_sources(&dir, 6)?;
    let (sink, capture) = plain_sink(&dir);
    let transport = stopping_on("file_00.c").with_batch_size(1);
    let mut dispatcher = Dispatcher::new(transport, Arc::clone(&sink), capacity(4));

    dispatcher.dispatch_files(&files, &[])?;
    assert!(sink.stop_requested());
    // Four were published before the stop reply arrived; they are still owed
    assert_eq!(dispatcher.stats().files_submitted, 4);
    assert_eq!(dispatcher.stats().files_skipped, 2);

    dispatcher.drain()?;
    assert_eq!(dispatcher.in_flight(), 0);
    assert_eq!(sink.replies_handled(), 4);
    assert!(capture.text().contains("Server is shutting down\n"));
    assert!(capture.text().contains("Norme: file_03.c\n"));
    assert!(!capture.text().contains("file_04.c"));
    Ok(())
}

#[test]
fn test_run_reports_invalid_files_and_checks_the_rest() -> Result<()> {
    let dir = tempdir()?;
    fs::create_dir_all(dir.path().join("proj/.hidden"))?;
    fs::write(dir.path().join("proj/a.c"), "int a;\n")?;
    fs::write(dir.path().join("proj/a.h"), "int a(void);\n")?;
    fs::write(dir.path().join("proj/.hidden/b.c"), "int b;\n")?;
    fs::write(dir.path().join("notes.txt"), "todo\n")?;

    let (sink, capture) = plain_sink(&dir);
    let scanner = FileScanner::with_cwd(dir.path());
    let request = RunRequest::Check {
        paths: vec!["proj".into(), "notes.txt".into()],
        rules: vec![],
    };

    let summary = run(
        &request,
        MemoryTransport::echo(),
        Arc::clone(&sink),
        &scanner,
        capacity(2),
    )?;

    assert_eq!(summary.files_submitted, 2);
    assert_eq!(summary.replies_handled, 2);
    assert_eq!(summary.rejected, 1);
    assert!(!summary.stopped);

    let output = capture.text();
    assert!(output.starts_with("Norme: notes.txt\nWarning: Not a valid file\n"));
    assert!(output.contains("Norme: proj/a.c\nOK!\n"));
    assert!(output.contains("Norme: proj/a.h\nOK!\n"));
    assert!(!output.contains("b.c"));
    Ok(())
}

#[test]
fn test_run_stop_policy_completes_successfully() -> Result<()> {
    let dir = tempdir()?;
    create_sources(&dir, 5)?;
    let (sink, _capture) = plain_sink(&dir);
    let scanner = FileScanner::with_cwd(dir.path());
    let request = RunRequest::Check {
        paths: vec![],
        rules: vec![],
    };

    let summary = run(&request, stopping_on("file_01.c"), sink, &scanner, capacity(1))?;

    assert!(summary.stopped);
    assert_eq!(summary.files_submitted, 2);
    assert_eq!(summary.files_skipped, 3);
    assert_eq!(summary.replies_handled, 2);
    Ok(())
}

#[test]
fn test_version_request() -> Result<()> {
    let dir = tempdir()?;
    let (sink, capture) = plain_sink(&dir);
    let scanner = FileScanner::with_cwd(dir.path());
    let transport = MemoryTransport::new(|_| br#"{"display": "3.3.51"}"#.to_vec());

    let summary = run(&RunRequest::Version, transport, sink, &scanner, capacity(4))?;

    assert_eq!(summary.controls_submitted, 1);
    assert_eq!(summary.files_submitted, 0);
    assert_eq!(summary.replies_handled, 1);
    assert_eq!(
        capture.text(),
        format!("Client: {}\nServer:\n3.3.51\n", normq::client::CLIENT_VERSION)
    );
    Ok(())
}

#[test]
fn test_list_rules_request_publishes_help() -> Result<()> {
    let dir = tempdir()?;
    let (sink, capture) = plain_sink(&dir);
    let scanner = FileScanner::with_cwd(dir.path());
    let transport =
        MemoryTransport::new(|_| br#"{"display": "Rules:\nCheckComment CheckDefine"}"#.to_vec());

    let summary = run(&RunRequest::ListRules, transport, sink, &scanner, capacity(4))?;

    assert_eq!(summary.controls_submitted, 1);
    assert_eq!(
        capture.text(),
        "Server Rules:\nRules:\nCheckComment CheckDefine\n"
    );
    Ok(())
}

#[test]
fn test_malformed_reply_fails_the_run() -> Result<()> {
    let dir = tempdir()?;
    create_sources(&dir, 1)?;
    let (sink, _capture) = plain_sink(&dir);
    let scanner = FileScanner::with_cwd(dir.path());
    let request = RunRequest::Check {
        paths: vec![],
        rules: vec![],
    };

    let result = run(
        &request,
        MemoryTransport::new(|_| b"500 Internal Error".to_vec()),
        Arc::clone(&sink),
        &scanner,
        capacity(4),
    );

    assert!(matches!(
        result,
        Err(normq::ClientError::MalformedReply { .. })
    ));
    assert_eq!(sink.in_flight().get(), 0);
    Ok(())
}
