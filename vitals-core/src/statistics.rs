use crate::{CategoryStatistic, ClinicalResource, VitalGroups, VitalStatistics};

/// Trung bình và độ lệch chuẩn mẫu (chia cho n-1) của các giá trị số.
///
/// Bản ghi thiếu giá trị số bị bỏ qua; dưới hai giá trị thì trả về rỗng.
pub fn summarize(resources: &[ClinicalResource]) -> CategoryStatistic {
    let values: Vec<f64> = resources
        .iter()
        .filter_map(ClinicalResource::numeric_value)
        .collect();

    if values.len() < 2 {
        return CategoryStatistic::default();
    }

    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1.0);

    CategoryStatistic {
        mean: Some(mean),
        stddev: Some(variance.sqrt()),
    }
}

/// Thống kê cho cả bảy nhóm.
pub fn statistics(groups: &VitalGroups) -> VitalStatistics {
    groups
        .iter()
        .map(|(category, resources)| (category, summarize(resources)))
        .collect()
}
