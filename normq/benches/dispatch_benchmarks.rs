use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use normq::{DisplayMode, FileScanner, MemoryTransport, ResultSink, RunRequest};
use std::{fs, num::NonZeroUsize, sync::Arc};
use tempfile::tempdir;

fn create_tree(dir: &tempfile::TempDir, dirs: usize, files_per_dir: usize) -> std::io::Result<()> {
    for d in 0..dirs {
        let sub = dir.path().join(format!("module_{}", d));
        fs::create_dir_all(sub.join(".objs"))?;
        for f in 0..files_per_dir {
            fs::write(sub.join(format!("src_{}.c", f)), "int main(void);\n")?;
            fs::write(sub.join(format!("src_{}.h", f)), "int main(void);\n")?;
            fs::write(sub.join(".objs").join(format!("src_{}.c", f)), "")?;
            fs::write(sub.join(format!("notes_{}.txt", f)), "")?;
        }
    }
    Ok(())
}

fn bench_scan(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    create_tree(&dir, 20, 25).unwrap();
    let scanner = FileScanner::with_cwd(dir.path());

    c.bench_function("scan_tree", |b| {
        b.iter(|| black_box(scanner.scan(&["."]).unwrap()));
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    create_tree(&dir, 4, 25).unwrap();
    let scanner = FileScanner::with_cwd(dir.path());
    let request = RunRequest::Check {
        paths: vec![],
        rules: vec![],
    };

    let mut group = c.benchmark_group("Dispatch Capacity");
    for jobs in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &jobs, |b, &jobs| {
            b.iter(|| {
                let sink = Arc::new(ResultSink::new(
                    Box::new(std::io::sink()),
                    DisplayMode::Plain,
                    dir.path(),
                ));
                let transport = MemoryTransport::echo().with_batch_size(2);
                let capacity = NonZeroUsize::new(jobs).unwrap();
                black_box(normq::run(&request, transport, sink, &scanner, capacity).unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scan, bench_dispatch);
criterion_main!(benches);
