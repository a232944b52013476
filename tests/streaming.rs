use std::fs;
use std::path::{Path, PathBuf};

use tempfile::tempdir;
use timeline_store::array::Rights;
use timeline_store::config::{ServerConfig, ShardSpec};
use timeline_store::{
    BaseType, Container, Dataset, Datatype, Error, FilterKind, FilterSpec, Mask, Records,
    StreamingServer, TimeRange, Timeline,
};

const FEATURES: Datatype = Datatype {
    base: BaseType::Float,
    dimension: 2,
};

fn seconds(pairs: &[(i64, i64)]) -> Vec<TimeRange> {
    pairs
        .iter()
        .map(|&(start, stop)| TimeRange::new(start, stop - start, 1))
        .collect()
}

/// Data shard whose position `p` holds `p + 1` records.
fn write_data(path: &Path, shard: usize, ranges: &[(i64, i64)], datatype: Datatype) {
    let mut file: Container = Container::create(path, "file:///media.wav").expect("create");
    let timeline =
        Timeline::create(&mut file, "frames", seconds(ranges), "frames").expect("timeline");
    let mut dataset =
        Dataset::create(&mut file, "feat", &timeline, datatype, "features").expect("dataset");
    for position in 0..ranges.len() {
        let values: Vec<f32> = (0..(position + 1) * datatype.dimension)
            .map(|k| (shard * 100 + position * 10 + k) as f32)
            .collect();
        let records = Records::from_values(datatype.dimension, values).expect("records");
        dataset.write(&mut file, position, &records).expect("write");
    }
    dataset.close(&mut file).expect("close dataset");
    file.close().expect("close");
}

fn write_labels(path: &Path, ranges: &[(i64, i64)], values: &[&[i32]], dimension: usize) {
    let mut file: Container = Container::create(path, "file:///media.wav").expect("create");
    let timeline =
        Timeline::create(&mut file, "turns", seconds(ranges), "speaker turns").expect("timeline");
    let datatype = Datatype::new(BaseType::Int, dimension);
    let mut dataset =
        Dataset::create(&mut file, "spk", &timeline, datatype, "speakers").expect("dataset");
    for (position, labels) in values.iter().enumerate() {
        let records = Records::from_values(dimension, labels.to_vec()).expect("records");
        dataset.write(&mut file, position, &records).expect("write");
    }
    dataset.close(&mut file).expect("close dataset");
    file.close().expect("close");
}

/// Two shards:
///
/// shard 0: data [0,2) [2,4) [4,6) [6,8); labels [0,3)={1} [3,5)={2,3} [10,12)={1}
/// shard 1: data [0,1) [1,2);             labels [0,1)={2}
fn fixture(dir: &Path) -> Vec<ShardSpec> {
    let data0 = dir.join("data0.tls");
    let data1 = dir.join("data1.tls");
    let label0 = dir.join("label0.tls");
    let label1 = dir.join("label1.tls");
    write_data(&data0, 0, &[(0, 2), (2, 4), (4, 6), (6, 8)], FEATURES);
    write_data(&data1, 1, &[(0, 1), (1, 2)], FEATURES);
    write_labels(&label0, &[(0, 3), (3, 5), (10, 12)], &[&[1], &[2, 3], &[1]], 1);
    write_labels(&label1, &[(0, 1)], &[&[2]], 1);
    vec![spec(data0, Some(label0)), spec(data1, Some(label1))]
}

fn spec(data: PathBuf, label: Option<PathBuf>) -> ShardSpec {
    ShardSpec {
        data_path: data,
        data_dataset: "feat".to_string(),
        label_dataset: label.as_ref().map(|_| "spk".to_string()),
        label_path: label,
    }
}

#[test]
fn unfiltered_stream_serves_every_position() {
    let dir = tempdir().expect("tempdir");
    let shards = fixture(dir.path());
    let mut server: StreamingServer = StreamingServer::open(&shards, None).expect("open");
    assert!(server.statistics().is_none());
    assert_eq!(server.served_count(), 6);

    let mut seen = Vec::new();
    while let Some(entry) = server.read_next(FEATURES).expect("read") {
        assert!(entry.labels.is_empty());
        assert_eq!(entry.records.len(), entry.position + 1);
        seen.push((entry.shard, entry.position));
    }
    assert_eq!(seen, vec![(0, 0), (0, 1), (0, 2), (0, 3), (1, 0), (1, 1)]);
    assert!(server.is_eof());
    assert_eq!((server.cursor().shard, server.cursor().position), (0, 0));

    // a new pass starts from the first shard
    let entry = server.read_next(FEATURES).expect("read").expect("entry");
    assert_eq!((entry.shard, entry.position), (0, 0));
    assert!(!server.is_eof());
}

#[test]
fn filtered_stream_matches_direct_reads() {
    let dir = tempdir().expect("tempdir");
    let shards = fixture(dir.path());
    let filter = FilterSpec::new(FilterKind::EqualTo, 2);
    let mut server: StreamingServer = StreamingServer::open(&shards, Some(filter)).expect("open");

    assert_eq!(
        server.shard_mask(0),
        Some(&[Mask::Excluded, Mask::Served, Mask::Served, Mask::NoLabel][..])
    );
    assert_eq!(server.shard_mask(1), Some(&[Mask::Served, Mask::NoLabel][..]));

    let mut streamed = Vec::new();
    while let Some(entry) = server.read_next(FEATURES).expect("read") {
        streamed.push((entry.shard, entry.position, entry.labels.to_vec(), entry.records.clone()));
    }
    assert_eq!(
        streamed
            .iter()
            .map(|(s, p, labels, _)| (*s, *p, labels.clone()))
            .collect::<Vec<_>>(),
        vec![(0, 1, vec![1, 2, 3]), (0, 2, vec![2, 3]), (1, 0, vec![2])]
    );

    for (shard, position, _, records) in &streamed {
        let mut file: Container =
            Container::open(&shards[*shard].data_path, Rights::ReadOnly).expect("open file");
        let dataset = Dataset::open(&mut file, "feat").expect("open dataset");
        let direct = dataset.read(&file, *position, FEATURES).expect("direct read");
        assert_eq!(&direct, records);
    }
}

#[test]
fn statistics_count_labels_and_served_positions() {
    let dir = tempdir().expect("tempdir");
    let shards = fixture(dir.path());
    let filter = FilterSpec::new(FilterKind::EqualTo, 2);
    let server: StreamingServer = StreamingServer::open(&shards, Some(filter)).expect("open");
    let stats = server.statistics().expect("statistics");

    assert_eq!(stats.labels().collect::<Vec<_>>(), vec![1, 2, 3]);
    let counts: Vec<_> = stats.rows().iter().map(|r| (r.value, r.count, r.served)).collect();
    assert_eq!(counts, vec![(1, 2, 1), (2, 2, 3), (3, 1, 2)]);
    assert_eq!(stats.row(2).expect("row").served_per_shard, vec![2, 1]);

    assert_eq!(server.timeranges_for_label(1), vec![(0, 0), (0, 2)]);
    assert_eq!(server.timeranges_for_label(2), vec![(0, 1), (1, 0)]);
}

#[test]
fn dump_size_matches_dump_all() {
    let dir = tempdir().expect("tempdir");
    let shards = fixture(dir.path());
    for filter in [None, Some(FilterSpec::new(FilterKind::EqualTo, 2))] {
        let mut server: StreamingServer = StreamingServer::open(&shards, filter).expect("open");
        for base in [BaseType::Float, BaseType::Double, BaseType::Char] {
            let requested = FEATURES.with_base(base);
            let expected = server.dump_size(base);
            let (counts, records) = server.dump_all(requested).expect("dump");
            assert_eq!(records.byte_len(), expected);
            assert_eq!(counts.iter().sum::<usize>(), records.len());
            assert!(server.is_eof());
        }
    }
}

#[test]
fn filter_none_still_drops_unlabelled_positions() {
    let dir = tempdir().expect("tempdir");
    let shards = fixture(dir.path());
    let mut server: StreamingServer =
        StreamingServer::open(&shards, Some(FilterSpec::accept_all())).expect("open");
    let (counts, _) = server.dump_all(FEATURES).expect("dump");
    // shard 0 positions 0..3 and shard 1 position 0
    assert_eq!(counts, vec![1, 2, 3, 1]);
}

#[test]
fn open_failures_name_the_shard() {
    let dir = tempdir().expect("tempdir");
    let mut shards = fixture(dir.path());

    let missing = dir.path().join("missing.tls");
    let mut broken = shards.clone();
    broken[1].data_path = missing.clone();
    let err = StreamingServer::<timeline_store::array::DirStore>::open(&broken, None)
        .err()
        .expect("missing shard");
    assert!(matches!(err.root(), Error::NotFound { .. }));
    assert!(err.to_string().contains("missing.tls"));

    let other = dir.path().join("other.tls");
    write_data(&other, 2, &[(0, 1)], Datatype::new(BaseType::Float, 3));
    let mut mixed = shards.clone();
    mixed[1].data_path = other;
    let err = StreamingServer::<timeline_store::array::DirStore>::open(&mixed, None)
        .err()
        .expect("shape mismatch");
    assert!(matches!(err, Error::Shard { shard: 1, .. }));
    assert!(matches!(err.root(), Error::ShapeMismatch { .. }));

    let wide = dir.path().join("wide.tls");
    write_labels(&wide, &[(0, 1)], &[&[1, 2]], 2);
    let mut wide_labels = shards.clone();
    wide_labels[0].label_path = Some(wide);
    let filter = Some(FilterSpec::accept_all());
    let err = StreamingServer::<timeline_store::array::DirStore>::open(&wide_labels, filter)
        .err()
        .expect("label dimension");
    assert!(matches!(err.root(), Error::ShapeMismatch { .. }));

    shards[1].label_path = None;
    shards[1].label_dataset = None;
    let err = StreamingServer::<timeline_store::array::DirStore>::open(&shards, filter)
        .err()
        .expect("count mismatch");
    assert!(matches!(err, Error::ShardCountMismatch { data: 2, label: 1 }));

    for shard in &mut shards {
        shard.label_path = None;
        shard.label_dataset = None;
    }
    let err = StreamingServer::<timeline_store::array::DirStore>::open(&shards, filter)
        .err()
        .expect("no labels");
    assert!(matches!(err, Error::LabelUnavailable));
}

#[test]
fn read_request_with_wrong_dimension_fails() {
    let dir = tempdir().expect("tempdir");
    let shards = fixture(dir.path());
    let mut server: StreamingServer = StreamingServer::open(&shards, None).expect("open");
    let err = server
        .read_next(Datatype::new(BaseType::Float, 5))
        .err()
        .expect("shape");
    assert!(matches!(err, Error::ShapeMismatch { .. }));
    assert_eq!(server.cursor().position, 0);
}

#[test]
fn config_file_drives_the_server() {
    let dir = tempdir().expect("tempdir");
    fixture(dir.path());
    fs::write(dir.path().join("shards.lst"), "data0\ndata1\n").expect("list");
    fs::write(dir.path().join("labels.lst"), "label0\nlabel1\n").expect("list");
    let prefix = format!("{}/", dir.path().display());
    let config = serde_json::json!({
        "data": {
            "dataset": "feat",
            "files": { "prefix": prefix, "suffix": ".tls", "list": "shards.lst" }
        },
        "label": {
            "dataset": "spk",
            "files": { "prefix": prefix, "suffix": ".tls", "list": "labels.lst" }
        },
        "filter": { "kind": "equal_to", "reference": 2 },
        "max_samples_per_label": 5
    });
    let config_path = dir.path().join("server.json");
    fs::write(&config_path, config.to_string()).expect("config");

    let resolved = ServerConfig::load(&config_path)
        .and_then(|c| c.resolve())
        .expect("resolve");
    assert_eq!(resolved.shards.len(), 2);
    assert_eq!(resolved.shards[1].data_path, dir.path().join("data1.tls"));

    let mut server: StreamingServer = StreamingServer::from_config(&resolved).expect("open");
    assert_eq!(server.served_count(), 3);
    let (counts, _) = server.dump_all(FEATURES).expect("dump");
    assert_eq!(counts, vec![2, 3, 1]);
}
