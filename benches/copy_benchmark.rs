use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use sftp_plus::{
    copy::copy,
    fs::MemoryFilesystem,
    transfer::{BufferDataSource, FileDataSource, FileDataTarget, Task},
    Filesystem,
};
use std::sync::Arc;

const FILE_SIZE: usize = 10 * 1024 * 1024;

fn copy_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let data = bytes::Bytes::from((0..FILE_SIZE).map(|i| (i % 251) as u8).collect::<Vec<_>>());

    let mut group = c.benchmark_group("copy");
    group.throughput(Throughput::Bytes(FILE_SIZE as u64));
    group.sample_size(10);

    group.bench_function("buffer_to_memory_file", |b| {
        b.to_async(&runtime).iter(|| async {
            let fs: Arc<dyn Filesystem> = Arc::new(MemoryFilesystem::new());
            let mut source = BufferDataSource::new("data.bin", data.clone());
            let mut target = FileDataTarget::new(fs, "/data.bin");
            copy(&mut source, &mut target, &Task::silent()).await.unwrap();
        });
    });

    let fs = Arc::new(MemoryFilesystem::new());
    runtime.block_on(fs.insert_file("/src.bin", data.to_vec()));
    let fs: Arc<dyn Filesystem> = fs;

    group.bench_function("memory_file_to_memory_file", |b| {
        b.to_async(&runtime).iter(|| async {
            let mut source = FileDataSource::open(fs.clone(), "/src.bin").await.unwrap();
            let mut target = FileDataTarget::new(fs.clone(), "/dst.bin");
            copy(&mut source, &mut target, &Task::silent()).await.unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, copy_benchmark);
criterion_main!(benches);
