//! Logic lõi phân nhóm chỉ số sống, thống kê và dựng chuỗi biểu đồ.

mod classify;
mod latest;
mod series;
mod statistics;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub use classify::classify;
pub use latest::{latest, LatestReading};
pub use series::{build_series, series_timestamp};
pub use statistics::{statistics, summarize};

/// Giá trị định lượng kèm đơn vị.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: Option<String>,
}

/// Bản ghi lâm sàng đã chuẩn hoá tại biên nhận dữ liệu.
///
/// Các mốc thời gian giữ nguyên chuỗi gốc; việc đọc thời điểm diễn ra khi cần
/// để phân biệt "thiếu" với "không đọc được".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClinicalResource {
    pub resource_type: String,
    pub id: Option<String>,
    /// Mã của coding đầu tiên.
    pub code: Option<String>,
    pub value: Option<Quantity>,
    pub last_updated: Option<String>,
    pub effective_date_time: Option<String>,
    pub issued: Option<String>,
}

impl ClinicalResource {
    /// Thời điểm `meta.lastUpdated` nếu đọc được.
    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.last_updated.as_deref().and_then(parse_timestamp)
    }

    /// Giá trị số của quantity, bỏ qua NaN và vô cực.
    pub fn numeric_value(&self) -> Option<f64> {
        self.value
            .as_ref()
            .map(|quantity| quantity.value)
            .filter(|value| value.is_finite())
    }
}

/// Bảy nhóm chỉ số sống cố định.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VitalCategory {
    HeartRate,
    RespiratoryRate,
    Temperature,
    SystolicBp,
    DiastolicBp,
    MeanArterialPressure,
    OxygenSaturation,
}

impl VitalCategory {
    pub const ALL: [VitalCategory; 7] = [
        VitalCategory::HeartRate,
        VitalCategory::RespiratoryRate,
        VitalCategory::Temperature,
        VitalCategory::SystolicBp,
        VitalCategory::DiastolicBp,
        VitalCategory::MeanArterialPressure,
        VitalCategory::OxygenSaturation,
    ];

    /// Khoá dạng snake_case, trùng với tên khi serialize.
    pub fn as_str(self) -> &'static str {
        match self {
            VitalCategory::HeartRate => "heart_rate",
            VitalCategory::RespiratoryRate => "respiratory_rate",
            VitalCategory::Temperature => "temperature",
            VitalCategory::SystolicBp => "systolic_bp",
            VitalCategory::DiastolicBp => "diastolic_bp",
            VitalCategory::MeanArterialPressure => "mean_arterial_pressure",
            VitalCategory::OxygenSaturation => "oxygen_saturation",
        }
    }
}

/// Một dòng trong bảng mã: nhóm, mã ngoài, nhãn và màu hiển thị.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VitalCodeEntry {
    pub category: VitalCategory,
    pub code: String,
    pub label: String,
    pub color: String,
}

impl VitalCodeEntry {
    fn new(category: VitalCategory, code: &str, label: &str, color: &str) -> Self {
        Self {
            category,
            code: code.to_string(),
            label: label.to_string(),
            color: color.to_string(),
        }
    }
}

/// Bảng mã bất biến ánh xạ mã ngoài sang nhóm chỉ số sống.
///
/// Mỗi nhóm xuất hiện đúng một lần và không có mã trùng, nên ánh xạ
/// mã -> nhóm không chồng lấn. Mặc định là bảng item-id MIMIC-IV.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Vec<VitalCodeEntry>", into = "Vec<VitalCodeEntry>")]
pub struct VitalCodeTable {
    entries: Vec<VitalCodeEntry>,
}

impl VitalCodeTable {
    /// Tạo bảng mã sau khi kiểm tra tính toàn vẹn.
    pub fn new(entries: Vec<VitalCodeEntry>) -> Result<Self, VitalsError> {
        for category in VitalCategory::ALL {
            let count = entries
                .iter()
                .filter(|entry| entry.category == category)
                .count();
            if count != 1 {
                return Err(VitalsError::InvalidCodeTable(format!(
                    "nhóm {} xuất hiện {count} lần",
                    category.as_str()
                )));
            }
        }

        for (index, entry) in entries.iter().enumerate() {
            if entry.code.trim().is_empty() {
                return Err(VitalsError::InvalidCodeTable(format!(
                    "nhóm {} thiếu mã",
                    entry.category.as_str()
                )));
            }
            if entries[..index].iter().any(|other| other.code == entry.code) {
                return Err(VitalsError::InvalidCodeTable(format!(
                    "mã {} bị gán cho nhiều nhóm",
                    entry.code
                )));
            }
        }

        Ok(Self { entries })
    }

    /// Nhóm tương ứng với mã, `None` nếu mã không có trong bảng.
    pub fn category_for(&self, code: &str) -> Option<VitalCategory> {
        self.entries
            .iter()
            .find(|entry| entry.code == code)
            .map(|entry| entry.category)
    }

    pub fn entry(&self, category: VitalCategory) -> Option<&VitalCodeEntry> {
        self.entries.iter().find(|entry| entry.category == category)
    }

    /// Các dòng theo thứ tự khai báo.
    pub fn entries(&self) -> &[VitalCodeEntry] {
        &self.entries
    }
}

impl Default for VitalCodeTable {
    fn default() -> Self {
        Self {
            entries: vec![
                VitalCodeEntry::new(VitalCategory::HeartRate, "220045", "Heart Rate", "#E57373"),
                VitalCodeEntry::new(
                    VitalCategory::RespiratoryRate,
                    "220210",
                    "Respiratory Rate",
                    "#64B5F6",
                ),
                VitalCodeEntry::new(VitalCategory::Temperature, "223761", "Temperature", "#FFB74D"),
                VitalCodeEntry::new(VitalCategory::SystolicBp, "220179", "Systolic BP", "#BA68C8"),
                VitalCodeEntry::new(
                    VitalCategory::DiastolicBp,
                    "220180",
                    "Diastolic BP",
                    "#9575CD",
                ),
                VitalCodeEntry::new(
                    VitalCategory::MeanArterialPressure,
                    "220181",
                    "Mean Arterial Pressure",
                    "#4DB6AC",
                ),
                VitalCodeEntry::new(
                    VitalCategory::OxygenSaturation,
                    "220277",
                    "Oxygen Saturation",
                    "#81C784",
                ),
            ],
        }
    }
}

impl TryFrom<Vec<VitalCodeEntry>> for VitalCodeTable {
    type Error = VitalsError;

    fn try_from(entries: Vec<VitalCodeEntry>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<VitalCodeTable> for Vec<VitalCodeEntry> {
    fn from(table: VitalCodeTable) -> Self {
        table.entries
    }
}

/// Nhóm -> danh sách bản ghi, sắp giảm dần theo `lastUpdated`.
///
/// Luôn có đủ bảy khoá, kể cả khi nhóm rỗng.
/// Khi đọc từ JSON, các khoá thiếu được bù bằng nhóm rỗng.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    from = "BTreeMap<VitalCategory, Vec<ClinicalResource>>",
    into = "BTreeMap<VitalCategory, Vec<ClinicalResource>>"
)]
pub struct VitalGroups(BTreeMap<VitalCategory, Vec<ClinicalResource>>);

impl VitalGroups {
    /// Bảy nhóm rỗng.
    pub fn empty() -> Self {
        Self(
            VitalCategory::ALL
                .into_iter()
                .map(|category| (category, Vec::new()))
                .collect(),
        )
    }

    pub fn get(&self, category: VitalCategory) -> &[ClinicalResource] {
        self.0.get(&category).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VitalCategory, &[ClinicalResource])> {
        self.0
            .iter()
            .map(|(category, resources)| (*category, resources.as_slice()))
    }

    /// Tổng số bản ghi đã được phân nhóm.
    pub fn total(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    fn bucket_mut(&mut self, category: VitalCategory) -> &mut Vec<ClinicalResource> {
        self.0.entry(category).or_default()
    }

    fn buckets_mut(&mut self) -> impl Iterator<Item = &mut Vec<ClinicalResource>> {
        self.0.values_mut()
    }
}

impl Default for VitalGroups {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<BTreeMap<VitalCategory, Vec<ClinicalResource>>> for VitalGroups {
    fn from(buckets: BTreeMap<VitalCategory, Vec<ClinicalResource>>) -> Self {
        let mut groups = Self::empty();
        groups.0.extend(buckets);
        groups
    }
}

impl From<VitalGroups> for BTreeMap<VitalCategory, Vec<ClinicalResource>> {
    fn from(groups: VitalGroups) -> Self {
        groups.0
    }
}

/// Trung bình và độ lệch chuẩn mẫu của một nhóm.
///
/// Cả hai là `None` khi nhóm có ít hơn hai giá trị số; tầng hiển thị
/// phải coi đó là "chưa có dữ liệu", không phải lỗi.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct CategoryStatistic {
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
}

impl CategoryStatistic {
    pub fn is_available(&self) -> bool {
        self.mean.is_some() && self.stddev.is_some()
    }
}

/// Thống kê cho từng nhóm.
pub type VitalStatistics = BTreeMap<VitalCategory, CategoryStatistic>;

/// Chuỗi điểm `(mốc thời gian ms, giá trị)` sẵn sàng để vẽ.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChartSeries {
    pub label: String,
    pub color: String,
    pub points: Vec<(i64, f64)>,
}

/// Kết quả tổng hợp cho một bệnh nhân, tính lại toàn bộ mỗi lần làm mới.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PatientVitals {
    pub groups: VitalGroups,
    pub statistics: VitalStatistics,
    pub series: BTreeMap<VitalCategory, ChartSeries>,
    /// Số đo mới nhất của từng nhóm theo thứ tự bảng mã.
    #[serde(default)]
    pub latest: Vec<LatestReading>,
}

/// Chạy toàn bộ chuỗi xử lý: phân nhóm, thống kê, dựng chuỗi biểu đồ.
pub fn analyze(resources: &[ClinicalResource], table: &VitalCodeTable) -> PatientVitals {
    let groups = classify(resources, table);
    let statistics = statistics(&groups);
    let series = table
        .entries()
        .iter()
        .map(|entry| {
            (
                entry.category,
                build_series(groups.get(entry.category), &entry.color, &entry.label),
            )
        })
        .collect();

    let latest = latest(&groups, table);

    PatientVitals {
        groups,
        statistics,
        series,
        latest,
    }
}

/// Đọc mốc thời gian FHIR: RFC 3339, ngày giờ không múi giờ (coi là UTC),
/// hoặc ngày/tháng/năm rút gọn (lấy đầu kỳ).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }

    let date = match value.len() {
        10 => NaiveDate::parse_from_str(value, "%Y-%m-%d").ok(),
        7 => NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").ok(),
        4 => NaiveDate::parse_from_str(&format!("{value}-01-01"), "%Y-%m-%d").ok(),
        _ => None,
    }?;
    date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
}

/// Lỗi chung của lõi chỉ số sống.
#[derive(Debug, thiserror::Error)]
pub enum VitalsError {
    #[error("Bảng mã không hợp lệ: {0}")]
    InvalidCodeTable(String),
    #[error("Dữ liệu đầu vào thiếu thông tin tối thiểu")]
    MissingData,
    #[error("Không đọc được dữ liệu: {0}")]
    Parse(String),
}
