use chrono::{DateTime, Utc};

use crate::{parse_timestamp, ChartSeries, ClinicalResource};

/// Mốc thời gian của một điểm biểu đồ: `lastUpdated`, rồi `effectiveDateTime`,
/// rồi `issued`; lấy ứng viên đầu tiên có mặt và đọc được.
///
/// Khác với khoá sắp xếp của nhóm, vốn chỉ dùng `lastUpdated`.
pub fn series_timestamp(resource: &ClinicalResource) -> Option<DateTime<Utc>> {
    [
        &resource.last_updated,
        &resource.effective_date_time,
        &resource.issued,
    ]
    .into_iter()
    .flatten()
    .find_map(|raw| parse_timestamp(raw))
}

/// Chuyển một nhóm thành chuỗi `(ms, giá trị)`, giữ nguyên thứ tự đầu vào.
///
/// Bản ghi thiếu giá trị số hoặc không có mốc thời gian đọc được bị bỏ.
pub fn build_series(resources: &[ClinicalResource], color: &str, label: &str) -> ChartSeries {
    let points = resources
        .iter()
        .filter_map(|resource| {
            let value = resource.numeric_value()?;
            let timestamp = series_timestamp(resource)?;
            Some((timestamp.timestamp_millis(), value))
        })
        .collect();

    ChartSeries {
        label: label.to_string(),
        color: color.to_string(),
        points,
    }
}
