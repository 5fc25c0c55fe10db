use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ClinicalResource, VitalCategory, VitalCodeTable, VitalGroups};

/// Số đo mới nhất của một nhóm, dùng cho phần tóm tắt dạng văn bản.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatestReading {
    pub category: VitalCategory,
    pub label: String,
    /// `None` khi nhóm rỗng hoặc bản ghi mới nhất không có giá trị số.
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub last_updated: Option<String>,
}

/// Lấy phần tử đầu của từng nhóm (nhóm đã sắp giảm dần theo `lastUpdated`),
/// theo thứ tự của bảng mã.
pub fn latest(groups: &VitalGroups, table: &VitalCodeTable) -> Vec<LatestReading> {
    table
        .entries()
        .iter()
        .map(|entry| {
            let newest = groups.get(entry.category).first();
            LatestReading {
                category: entry.category,
                label: entry.label.clone(),
                value: newest.and_then(ClinicalResource::numeric_value),
                unit: newest
                    .and_then(|resource| resource.value.as_ref())
                    .and_then(|quantity| quantity.unit.clone()),
                last_updated: newest.and_then(|resource| resource.last_updated.clone()),
            }
        })
        .collect()
}

impl fmt::Display for LatestReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.value, self.unit.as_deref()) {
            (Some(value), Some(unit)) if !unit.is_empty() => {
                write!(f, "{}: {value} {unit}", self.label)
            }
            (Some(value), _) => write!(f, "{}: {value}", self.label),
            (None, _) => write!(f, "{}: Not available", self.label),
        }
    }
}
