use std::cmp::Reverse;

use crate::{ClinicalResource, VitalCodeTable, VitalGroups};

/// Phân nhóm bản ghi theo bảng mã rồi sắp mỗi nhóm giảm dần theo `lastUpdated`.
///
/// Bản ghi không có mã hoặc mã ngoài bảng bị bỏ qua. Thiếu `lastUpdated`
/// được coi là sớm nhất; các khoá bằng nhau giữ thứ tự ban đầu.
pub fn classify(resources: &[ClinicalResource], table: &VitalCodeTable) -> VitalGroups {
    let mut groups = VitalGroups::empty();

    for resource in resources {
        let Some(category) = resource
            .code
            .as_deref()
            .and_then(|code| table.category_for(code))
        else {
            continue;
        };
        groups.bucket_mut(category).push(resource.clone());
    }

    for bucket in groups.buckets_mut() {
        bucket.sort_by_cached_key(|resource| Reverse(resource.last_updated_at()));
    }

    groups
}
