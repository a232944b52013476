use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::tempdir;
use timeline_store::config::ShardSpec;
use timeline_store::join::join;
use timeline_store::time::search;
use timeline_store::{
    BaseType, Container, Dataset, Datatype, FilterSpec, Records, StreamingServer, TimeRange,
    Timeline,
};

const FRAMES: i64 = 100_000;
const TURN: i64 = 37;

/// 10 ms frames at a 1 kHz scale.
fn frames(count: i64) -> Vec<TimeRange> {
    (0..count).map(|i| TimeRange::new(i * 10, 10, 1000)).collect()
}

/// Back-to-back label turns of `TURN` tenths of a second.
fn turns(count: i64) -> Vec<TimeRange> {
    (0..count).map(|i| TimeRange::new(i * TURN, TURN, 10)).collect()
}

fn bench_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("join");
    for count in [1_000, FRAMES] {
        let data = frames(count);
        let labels = turns(count / 37 + 1);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| join(black_box(&data), black_box(&labels)))
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let data = frames(FRAMES);
    let targets: Vec<TimeRange> = (0..1024).map(|i| data[(i * 97) % data.len()]).collect();
    let mut group = c.benchmark_group("search");
    group.throughput(Throughput::Elements(targets.len() as u64));
    group.bench_function("frames", |b| {
        b.iter(|| {
            targets
                .iter()
                .filter(|target| search(black_box(&data), target).is_some())
                .count()
        })
    });
    group.finish();
}

fn bench_stream(c: &mut Criterion) {
    let dir = tempdir().expect("tempdir");
    let data_path = dir.path().join("data.tls");
    let label_path = dir.path().join("label.tls");
    let datatype = Datatype::new(BaseType::Float, 16);

    let mut file: Container = Container::create(&data_path, "file:///bench.wav").expect("create");
    let timeline =
        Timeline::create(&mut file, "frames", frames(10_000), "frames").expect("timeline");
    let mut dataset =
        Dataset::create(&mut file, "feat", &timeline, datatype, "features").expect("dataset");
    let record = Records::from_values(16, vec![0.5f32; 16]).expect("record");
    for position in 0..timeline.len() {
        dataset.write(&mut file, position, &record).expect("write");
    }
    dataset.close(&mut file).expect("close");
    file.close().expect("close");

    let mut file: Container = Container::create(&label_path, "file:///bench.wav").expect("create");
    let timeline = Timeline::create(&mut file, "turns", turns(300), "turns").expect("timeline");
    let int1 = Datatype::new(BaseType::Int, 1);
    let mut dataset =
        Dataset::create(&mut file, "spk", &timeline, int1, "speakers").expect("dataset");
    for position in 0..timeline.len() {
        let speaker = Records::from_values(1, vec![(position % 4) as i32]).expect("record");
        dataset.write(&mut file, position, &speaker).expect("write");
    }
    dataset.close(&mut file).expect("close");
    file.close().expect("close");

    let shards = vec![ShardSpec {
        data_path,
        data_dataset: "feat".to_string(),
        label_path: Some(label_path),
        label_dataset: Some("spk".to_string()),
    }];
    let mut server: StreamingServer =
        StreamingServer::open(&shards, Some(FilterSpec::accept_all())).expect("server");
    let served = server.served_count();

    let mut group = c.benchmark_group("stream");
    group.throughput(Throughput::Elements(served as u64));
    group.bench_function("one_pass", |b| {
        b.iter(|| {
            let mut seen = 0usize;
            while let Some(entry) = server.read_next(datatype).expect("read") {
                seen += black_box(entry.records.len());
            }
            seen
        })
    });
    group.finish();
}

criterion_group!(benches, bench_join, bench_search, bench_stream);
criterion_main!(benches);
