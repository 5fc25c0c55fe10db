//! Bridge WASM <-> JavaScript cho tầng hiển thị chỉ số sống.

use serde::Deserialize;
use serde_wasm_bindgen::{from_value, to_value};
use vitals_core::{ClinicalResource, VitalCodeTable, VitalsError};
use wasm_bindgen::prelude::*;

#[derive(Deserialize)]
struct JsSeriesStyle {
    color: String,
    label: String,
}

/// Tổng hợp toàn bộ chỉ số sống từ một bundle FHIR.
#[wasm_bindgen]
pub fn summarize_bundle(
    input_bundle: JsValue,
    code_table: Option<JsValue>,
) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let bundle_value = from_value::<serde_json::Value>(input_bundle)
        .map_err(|err| JsValue::from_str(&format!("Không đọc được JSON bundle: {err}")))?;
    let table = read_table(code_table)?;

    let vitals = vitals_fhir::summarize_bundle_value(&bundle_value, &table)
        .map_err(|err| JsValue::from_str(&format_vitals_error(err)))?;

    to_value(&vitals).map_err(|err| JsValue::from_str(&format!("Không serialize kết quả: {err}")))
}

/// Phân nhóm danh sách bản ghi đã chuẩn hoá.
#[wasm_bindgen]
pub fn classify(resources: JsValue, code_table: Option<JsValue>) -> Result<JsValue, JsValue> {
    let resources = read_resources(resources)?;
    let table = read_table(code_table)?;
    to_value(&vitals_core::classify(&resources, &table))
        .map_err(|err| JsValue::from_str(&format!("Không serialize nhóm: {err}")))
}

/// Trung bình và độ lệch chuẩn của một nhóm.
#[wasm_bindgen]
pub fn statistics(resources: JsValue) -> Result<JsValue, JsValue> {
    let resources = read_resources(resources)?;
    to_value(&vitals_core::summarize(&resources))
        .map_err(|err| JsValue::from_str(&format!("Không serialize thống kê: {err}")))
}

/// Dựng chuỗi biểu đồ cho một nhóm với màu và nhãn do phía gọi cung cấp.
#[wasm_bindgen]
pub fn build_series(resources: JsValue, style: JsValue) -> Result<JsValue, JsValue> {
    let resources = read_resources(resources)?;
    let style: JsSeriesStyle = from_value(style)
        .map_err(|err| JsValue::from_str(&format!("Không đọc được màu/nhãn: {err}")))?;
    to_value(&vitals_core::build_series(
        &resources,
        &style.color,
        &style.label,
    ))
    .map_err(|err| JsValue::from_str(&format!("Không serialize chuỗi: {err}")))
}

fn read_resources(value: JsValue) -> Result<Vec<ClinicalResource>, JsValue> {
    from_value(value)
        .map_err(|err| JsValue::from_str(&format!("Không đọc được danh sách bản ghi: {err}")))
}

fn read_table(value: Option<JsValue>) -> Result<VitalCodeTable, JsValue> {
    match value {
        Some(js_table) => from_value(js_table)
            .map_err(|err| JsValue::from_str(&format!("Không đọc được bảng mã: {err}"))),
        None => Ok(VitalCodeTable::default()),
    }
}

fn format_vitals_error(err: VitalsError) -> String {
    format!("Vitals error: {err}")
}
