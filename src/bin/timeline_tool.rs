use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use timeline_store::array::Rights;
use timeline_store::aggregate::aggregate;
use timeline_store::ascii;
use timeline_store::config::ServerConfig;
use timeline_store::copy::{copy_dataset, copy_timeline};
use timeline_store::{
    Aggregation, BaseType, Container, Dataset, Datatype, FilterSpec, Records, StreamingServer,
    Timeline, Values,
};

#[derive(Parser)]
#[command(name = "timeline-tool", version, about = "Timeline store tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum BaseArg {
    Int,
    Float,
    Double,
    Char,
}

impl From<BaseArg> for BaseType {
    fn from(value: BaseArg) -> Self {
        match value {
            BaseArg::Int => BaseType::Int,
            BaseArg::Float => BaseType::Float,
            BaseArg::Double => BaseType::Double,
            BaseArg::Char => BaseType::Char,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty container.
    Init {
        file: PathBuf,
        #[arg(long = "medium")]
        medium: String,
    },
    /// List timelines and datasets.
    Ls { file: PathBuf },
    /// Import a timeline, and optionally a dataset, from text.
    Import {
        input: PathBuf,
        file: PathBuf,
        #[arg(short = 't', long = "timeline")]
        timeline: String,
        #[arg(short = 'd', long = "dataset")]
        dataset: Option<String>,
        #[arg(long = "base-type", value_enum, default_value_t = BaseArg::Double)]
        base_type: BaseArg,
        #[arg(short = 'n', long = "dimension", default_value_t = 1)]
        dimension: usize,
        #[arg(short = 'p', long = "precision", default_value_t = 1000)]
        precision: i32,
        #[arg(short = 'D', long = "description")]
        description: String,
    },
    /// Reduce a dataset onto another timeline, one record per target range.
    Aggregate {
        file: PathBuf,
        #[arg(short = 'd', long = "dataset")]
        dataset: String,
        #[arg(short = 't', long = "timeline")]
        timeline: String,
        #[arg(long = "maximum", conflicts_with = "minimum", required_unless_present = "minimum")]
        maximum: bool,
        #[arg(long = "minimum")]
        minimum: bool,
    },
    /// Copy a timeline, or a dataset with its timeline, into another container.
    Cp {
        input: PathBuf,
        output: PathBuf,
        #[arg(
            short = 't',
            long = "timeline",
            conflicts_with = "dataset",
            required_unless_present = "dataset"
        )]
        timeline: Option<String>,
        #[arg(short = 'd', long = "dataset")]
        dataset: Option<String>,
    },
    /// Stream every served entry of a server config as text.
    Dump {
        config: PathBuf,
        #[arg(long = "labels")]
        labels: bool,
    },
    /// Print label statistics of a server config.
    Stat { config: PathBuf },
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut out = io::BufWriter::new(io::stdout());
    match cli.command {
        Commands::Init { file, medium } => {
            let container: Container = Container::create(&file, &medium)
                .with_context(|| format!("creating {}", file.display()))?;
            container.close()?;
        }
        Commands::Ls { file } => cmd_ls(&file, &mut out)?,
        Commands::Import {
            input,
            file,
            timeline,
            dataset,
            base_type,
            dimension,
            precision,
            description,
        } => cmd_import(
            &input,
            &file,
            &timeline,
            dataset.as_deref(),
            Datatype::new(base_type.into(), dimension),
            precision,
            &description,
        )?,
        Commands::Aggregate {
            file,
            dataset,
            timeline,
            maximum,
            minimum: _,
        } => {
            let how = if maximum {
                Aggregation::Maximum
            } else {
                Aggregation::Minimum
            };
            cmd_aggregate(&file, &dataset, &timeline, how)?
        }
        Commands::Cp {
            input,
            output,
            timeline,
            dataset,
        } => cmd_cp(&input, &output, timeline.as_deref(), dataset.as_deref())?,
        Commands::Dump { config, labels } => cmd_dump(&config, labels, &mut out)?,
        Commands::Stat { config } => cmd_stat(&config, &mut out)?,
    }
    out.flush()?;
    Ok(())
}

fn cmd_ls(file: &Path, out: &mut impl Write) -> Result<()> {
    let mut container: Container = Container::open(file, Rights::ReadOnly)
        .with_context(|| format!("opening {}", file.display()))?;
    writeln!(out, "medium: {}", container.medium().unwrap_or_default())?;
    for path in container.list_timelines()? {
        let timeline = Timeline::open(&mut container, &path)?;
        let used = Timeline::times_used(&mut container, &path)?;
        writeln!(
            out,
            "timeline {path}\t{} ranges\tused {used}\t{}",
            timeline.len(),
            timeline.description()
        )?;
    }
    for path in container.list_datasets()? {
        let dataset = Dataset::open(&mut container, &path)?;
        writeln!(
            out,
            "dataset {path}\t{}\ttimeline {}\t{} stored\t{}",
            dataset.datatype(),
            dataset.timeline_path(),
            dataset.stored_len(),
            dataset.description()
        )?;
        dataset.close(&mut container)?;
    }
    Ok(())
}

fn cmd_import(
    input: &Path,
    file: &Path,
    timeline_path: &str,
    dataset_path: Option<&str>,
    datatype: Datatype,
    precision: i32,
    description: &str,
) -> Result<()> {
    if precision <= 0 {
        bail!("precision must be positive, got {precision}");
    }
    let mut container: Container = Container::open(file, Rights::ReadWrite)
        .with_context(|| format!("opening {}", file.display()))?;
    let reader = || -> Result<BufReader<File>> {
        Ok(BufReader::new(
            File::open(input).with_context(|| format!("reading {}", input.display()))?,
        ))
    };

    let timeline = if container.list_timelines()?.iter().any(|p| p == timeline_path) {
        log::info!("reusing timeline {timeline_path}");
        Timeline::open(&mut container, timeline_path)?
    } else {
        let ranges = ascii::read_timeline(reader()?, precision)?;
        Timeline::create(&mut container, timeline_path, ranges, description)
            .with_context(|| format!("creating timeline {timeline_path}"))?
    };

    if let Some(dataset_path) = dataset_path {
        let (ranges, records) = ascii::read_records(reader()?, precision, datatype.dimension)?;
        ascii::check_alignment(timeline.ranges(), &ranges)
            .with_context(|| format!("importing {} into {dataset_path}", input.display()))?;
        let mut dataset =
            Dataset::create(&mut container, dataset_path, &timeline, datatype, description)
                .with_context(|| format!("creating dataset {dataset_path}"))?;
        let dimension = datatype.dimension;
        let values = records.convert(datatype.base);
        for position in 0..values.len() {
            let one = single_record(&values, position, dimension)?;
            dataset.write(&mut container, position, &one)?;
        }
        log::info!("imported {} records into {dataset_path}", values.len());
        dataset.close(&mut container)?;
    }
    container.close()?;
    Ok(())
}

fn cmd_aggregate(file: &Path, dataset: &str, timeline: &str, how: Aggregation) -> Result<()> {
    let mut container: Container = Container::open(file, Rights::ReadWrite)
        .with_context(|| format!("opening {}", file.display()))?;
    let aggregated = aggregate(&mut container, dataset, timeline, how)
        .with_context(|| format!("aggregating {dataset} onto {timeline}"))?;
    log::info!("wrote {}", aggregated.path());
    aggregated.close(&mut container)?;
    container.close()?;
    Ok(())
}

fn cmd_cp(
    input: &Path,
    output: &Path,
    timeline: Option<&str>,
    dataset: Option<&str>,
) -> Result<()> {
    let mut from: Container = Container::open(input, Rights::ReadOnly)
        .with_context(|| format!("opening {}", input.display()))?;
    let mut to: Container = Container::open(output, Rights::ReadWrite)
        .with_context(|| format!("opening {}", output.display()))?;
    match (timeline, dataset) {
        (Some(path), _) => {
            copy_timeline(&mut from, &mut to, path)
                .with_context(|| format!("copying timeline {path}"))?;
        }
        (None, Some(path)) => copy_dataset(&mut from, &mut to, path)
            .with_context(|| format!("copying dataset {path}"))?
            .close(&mut to)?,
        (None, None) => bail!("one of --timeline or --dataset is required"),
    }
    to.close()?;
    from.close()?;
    Ok(())
}

fn single_record(records: &Records, index: usize, dimension: usize) -> Result<Records> {
    let range = index * dimension..(index + 1) * dimension;
    let values: Values = match records.values() {
        Values::Int(v) => v[range].to_vec().into(),
        Values::Float(v) => v[range].to_vec().into(),
        Values::Double(v) => v[range].to_vec().into(),
        Values::Char(v) => v[range].to_vec().into(),
    };
    Ok(Records::from_values(dimension, values)?)
}

fn open_server(config: &Path) -> Result<StreamingServer> {
    let resolved = ServerConfig::load(config)
        .and_then(|c| c.resolve())
        .with_context(|| format!("loading {}", config.display()))?;
    Ok(StreamingServer::from_config(&resolved)?)
}

fn cmd_dump(config: &Path, labels: bool, out: &mut impl Write) -> Result<()> {
    let mut server = open_server(config)?;
    let labels = label_column(labels, server.filter())?;
    let datatype = server.datatype();
    while let Some(entry) = server.read_next(datatype)? {
        let labels = labels.then_some(entry.labels);
        ascii::write_records(out, &entry.range, labels, entry.records)?;
    }
    Ok(())
}

/// Labels are only joined when a filter is configured.
fn label_column(requested: bool, filter: Option<FilterSpec>) -> Result<bool> {
    if requested && filter.is_none() {
        bail!("--labels needs a label filter in the server config");
    }
    Ok(requested)
}

fn cmd_stat(config: &Path, out: &mut impl Write) -> Result<()> {
    let server = open_server(config)?;
    writeln!(
        out,
        "{} shards, {} served positions, {} bytes",
        server.num_shards(),
        server.served_count(),
        server.dump_size(server.datatype().base)
    )?;
    match server.statistics() {
        Some(stats) => stats.write_table(out)?,
        None => writeln!(out, "no label filter configured")?,
    }
    Ok(())
}
