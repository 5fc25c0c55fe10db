use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vitals_core::{analyze, PatientVitals, VitalCodeTable};
use vitals_fhir::{
    summarize_bundle_str, FetchConfig, HttpTransport, ResourceFetcher, DEFAULT_BASE_URL,
};

const DEFAULT_LOG_FILTER: &str = "vitals_fhir=info,vitals_cli=info";

#[derive(Parser, Debug)]
#[command(
    name = "vitals-cli",
    about = "Tổng hợp chỉ số sống của bệnh nhân từ máy chủ FHIR hoặc file bundle."
)]
struct Args {
    /// Địa chỉ máy chủ FHIR truy cập được từ bên ngoài.
    #[arg(long, env = "VITALS_FHIR_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Mã bệnh nhân cần truy vấn.
    #[arg(short, long)]
    patient: Option<String>,

    /// Loại resource chứa chỉ số sống.
    #[arg(long, default_value = "Observation")]
    resource_type: String,

    /// Đọc bundle JSON từ file thay vì gọi máy chủ.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Bảng mã thay thế dạng JSON.
    #[arg(long)]
    codes: Option<PathBuf>,

    /// Số trang tối đa cho một lần truy vấn.
    #[arg(long, default_value_t = 1000)]
    max_pages: usize,

    /// In kết quả dạng JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let table = load_table(args.codes.as_ref())?;

    let vitals = match (&args.input, &args.patient) {
        (Some(path), _) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("Không đọc được file {path:?}"))?;
            summarize_bundle_str(&data, &table)?
        }
        (None, Some(patient)) => fetch_patient(&args, patient, &table).await?,
        (None, None) => bail!("Cần --patient hoặc --input"),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&vitals)?);
    } else {
        print_summary(&vitals, &table);
    }

    Ok(())
}

/// `RUST_LOG` nếu có, ngược lại mức info cho crate của dự án.
fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

async fn fetch_patient(
    args: &Args,
    patient: &str,
    table: &VitalCodeTable,
) -> anyhow::Result<PatientVitals> {
    let config = FetchConfig {
        base_url: args.base_url.clone(),
        max_pages: args.max_pages,
        ..FetchConfig::default()
    };
    let transport = HttpTransport::new(&config)?;
    let fetcher = ResourceFetcher::new(transport, &config)?;

    let resources = fetcher
        .fetch_all(&args.resource_type, patient)
        .await
        .with_context(|| format!("Không tải được {} của bệnh nhân {patient}", args.resource_type))?;
    tracing::info!(count = resources.len(), "đã tải resource");

    Ok(analyze(&resources, table))
}

fn load_table(path: Option<&PathBuf>) -> anyhow::Result<VitalCodeTable> {
    let Some(path) = path else {
        return Ok(VitalCodeTable::default());
    };
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Không đọc được bảng mã {path:?}"))?;
    serde_json::from_str(&data).with_context(|| format!("Bảng mã không hợp lệ: {path:?}"))
}

fn print_summary(vitals: &PatientVitals, table: &VitalCodeTable) {
    for entry in table.entries() {
        let count = vitals.groups.get(entry.category).len();
        let points = vitals
            .series
            .get(&entry.category)
            .map_or(0, |series| series.points.len());
        let stat = vitals
            .statistics
            .get(&entry.category)
            .copied()
            .unwrap_or_default();

        match (stat.mean, stat.stddev) {
            (Some(mean), Some(stddev)) => println!(
                "{:<24} n={count:<5} points={points:<5} mean={mean:.2} sd={stddev:.2}",
                entry.label
            ),
            _ => println!(
                "{:<24} n={count:<5} points={points:<5} không đủ dữ liệu",
                entry.label
            ),
        }
    }

    let latest: Vec<String> = vitals.latest.iter().map(ToString::to_string).collect();
    println!("Mới nhất: {}", latest.join(", "));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_filter_enables_project_targets() {
        let filter = EnvFilter::new(DEFAULT_LOG_FILTER).to_string();
        assert!(filter.contains("vitals_fhir=info"));
        assert!(filter.contains("vitals_cli=info"));
    }

    #[test]
    fn explicit_filter_keeps_requested_debug_level() {
        let filter = EnvFilter::new("vitals_fhir=debug").to_string();
        assert!(filter.contains("vitals_fhir=debug"));
        assert!(!filter.contains("vitals_fhir=info"));
    }

    #[test]
    fn args_require_no_patient_for_offline_input() {
        let args = Args::try_parse_from(["vitals-cli", "--input", "bundle.json"]).unwrap();
        assert!(args.patient.is_none());
        assert_eq!(args.resource_type, "Observation");
    }
}
