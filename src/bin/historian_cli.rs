use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use historian::{DataPoint, Historian, HistorianConfig, LogSink, Severity, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Parser)]
#[command(name = "historian-cli", version, about = "Inspect, export and import historian files")]
struct Cli {
    /// JSON configuration file; `--dir` overrides its directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// History directory.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List backing files, oldest first.
    Files,
    /// List series stored in any file.
    Tables,
    /// Write a series as CSV to stdout.
    Export {
        series: String,
        /// Start time, ms since the epoch or RFC 3339.
        #[arg(long, default_value = "0")]
        start: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 10_000)]
        limit: usize,
    },
    /// Append `time,value,quality` rows from a CSV file to a series.
    Import {
        series: String,
        input: PathBuf,
    },
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
    let mut config = match &cli.config {
        Some(path) => HistorianConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HistorianConfig::default(),
    };
    if let Some(dir) = cli.dir {
        config.directory = dir;
    }
    // One-shot process: nothing to watch.
    config.watch_directory = false;

    let mut historian = Historian::new(config);
    let mut log = LogSink::new();
    let mut out = io::BufWriter::new(io::stdout());

    let result = match cli.command {
        Commands::Files => cmd_files(&mut historian, &mut log, &mut out),
        Commands::Tables => cmd_tables(&mut historian, &mut log, &mut out),
        Commands::Export {
            series,
            start,
            offset,
            limit,
        } => cmd_export(&mut historian, &mut log, &mut out, &series, &start, offset, limit),
        Commands::Import { series, input } => cmd_import(&mut historian, &mut log, &series, &input),
    };
    historian.shutdown(&mut log);
    out.flush()?;
    let reported = report(&mut log);
    result?;
    reported
}

fn cmd_files(historian: &mut Historian, log: &mut LogSink, out: &mut dyn Write) -> Result<()> {
    if !historian.open(log) {
        bail!("cannot open {}", historian.config().directory.display());
    }
    for file in historian.files() {
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            file.key,
            format_ms(file.key),
            file.size_bytes,
            file.path.display()
        )?;
    }
    Ok(())
}

fn cmd_tables(historian: &mut Historian, log: &mut LogSink, out: &mut dyn Write) -> Result<()> {
    let Some(names) = historian.series_names(log) else {
        bail!("cannot list series");
    };
    for name in names {
        writeln!(out, "{name}")?;
    }
    Ok(())
}

fn cmd_export(
    historian: &mut Historian,
    log: &mut LogSink,
    out: &mut dyn Write,
    series: &str,
    start: &str,
    offset: u64,
    limit: usize,
) -> Result<()> {
    let start = parse_time(start)?;
    let Some(points) = historian.read_range(series, start, offset, limit, log) else {
        bail!("cannot read {series}");
    };
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["time", "timestamp_ms", "value", "quality"])?;
    for point in points.iter().take_while(|p| !p.is_placeholder()) {
        writer.write_record([
            format_ms(point.timestamp),
            point.timestamp.to_string(),
            format_value(&point.value),
            point.quality.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn cmd_import(historian: &mut Historian, log: &mut LogSink, series: &str, input: &Path) -> Result<()> {
    let mut reader = csv::Reader::from_path(input).with_context(|| format!("opening {}", input.display()))?;
    let mut imported = 0u64;
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading row {}", line + 1))?;
        let (Some(time), Some(value)) = (record.get(0), record.get(1)) else {
            bail!("row {} needs at least time and value", line + 1);
        };
        let quality = match record.get(2) {
            Some(q) if !q.trim().is_empty() => q.trim().parse().with_context(|| format!("quality in row {}", line + 1))?,
            _ => 0,
        };
        let point = DataPoint::new(parse_time(time)?, parse_value(value), quality);
        if !historian.write(series, &point, log) {
            bail!("write of row {} failed", line + 1);
        }
        imported += 1;
    }
    if !historian.flush(log) {
        bail!("flush failed after {imported} rows");
    }
    eprintln!("imported {imported} points into {series}");
    Ok(())
}

fn parse_time(text: &str) -> Result<i64> {
    let text = text.trim();
    if let Ok(ms) = text.parse::<i64>() {
        return Ok(ms);
    }
    let parsed = OffsetDateTime::parse(text, &Rfc3339).with_context(|| format!("bad time {text:?}"))?;
    Ok((parsed.unix_timestamp_nanos() / 1_000_000) as i64)
}

fn parse_value(text: &str) -> Value {
    let text = text.trim();
    if text.is_empty() {
        Value::Null
    } else if let Ok(i) = text.parse::<i64>() {
        Value::Int(i)
    } else if let Ok(f) = text.parse::<f64>() {
        Value::Float(f)
    } else {
        match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Text(text.to_string()),
        }
    }
}

fn format_ms(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) | Value::DateTime(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Bytes(b) => b.iter().map(|byte| format!("{byte:02x}")).collect(),
    }
}

fn report(log: &mut LogSink) -> Result<()> {
    let errors = log.count(Severity::Error);
    for entry in log.drain() {
        if entry.severity >= Severity::Warning {
            eprintln!("{:?} [{}] {}", entry.severity, entry.category, entry.message);
        }
    }
    if errors > 0 {
        bail!("{errors} errors reported");
    }
    Ok(())
}
