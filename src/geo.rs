use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::aggregate::AggregatedRow;

/// Normalize a district code to its canonical 6-character zero-padded
/// form. Codes sourced from numeric columns may carry a float suffix
/// ("160101.0"); codes longer than 6 digits are left as-is.
pub fn normalize_ubigeo(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits = match trimmed.split_once('.') {
        Some((head, tail)) if !head.is_empty() && tail.bytes().all(|b| b == b'0') => head,
        _ => trimmed,
    };
    format!("{digits:0>6}")
}

fn property_string(props: &Map<String, Value>, key: &str) -> String {
    match props.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Index district display names by UBIGEO from the boundary document.
/// Later features overwrite earlier ones for duplicate codes.
pub fn district_names(boundaries: &Value) -> HashMap<String, String> {
    let mut names = HashMap::new();
    let Some(features) = boundaries.get("features").and_then(Value::as_array) else {
        return names;
    };
    for feature in features {
        let Some(props) = feature.get("properties").and_then(Value::as_object) else {
            continue;
        };
        let ubigeo = normalize_ubigeo(&property_string(props, "UBIGEO"));
        names.insert(ubigeo, property_string(props, "NOMBDIST"));
    }
    names
}

/// Merge aggregated metrics into a deep copy of the boundary document.
/// Every output feature ends up with all three of CASOS, POBTOT and TIA
/// in its properties: numbers where an aggregated row matches the
/// feature's district code, JSON null otherwise. The input is never
/// mutated.
pub fn merge_metrics(boundaries: &Value, rows: &[AggregatedRow]) -> Value {
    let by_code: HashMap<&str, &AggregatedRow> =
        rows.iter().map(|r| (r.ubigeo.as_str(), r)).collect();

    let mut merged = boundaries.clone();
    let Some(features) = merged.get_mut("features").and_then(Value::as_array_mut) else {
        return merged;
    };
    for feature in features {
        let Some(feature) = feature.as_object_mut() else {
            continue;
        };
        let props = feature
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(props) = props.as_object_mut() else {
            continue;
        };
        let ubigeo = normalize_ubigeo(&property_string(props, "UBIGEO"));
        let row = by_code.get(ubigeo.as_str());
        props.insert("CASOS".into(), number_or_null(row.map(|r| r.cases)));
        props.insert("POBTOT".into(), number_or_null(row.and_then(|r| r.population)));
        props.insert("TIA".into(), number_or_null(row.and_then(|r| r.tia)));
    }
    merged
}

fn number_or_null(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_boundaries() -> Value {
        json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"UBIGEO": "160101", "NOMBDIST": "IQUITOS"},
                    "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0]]]}
                },
                {
                    "type": "Feature",
                    "properties": {"UBIGEO": 160102, "NOMBDIST": "ALTO NANAY"},
                    "geometry": {"type": "Polygon", "coordinates": [[[1.0, 1.0]]]}
                }
            ]
        })
    }

    #[test]
    fn normalizes_short_numeric_and_float_codes() {
        assert_eq!(normalize_ubigeo("1234"), "001234");
        assert_eq!(normalize_ubigeo("160101"), "160101");
        assert_eq!(normalize_ubigeo("160101.0"), "160101");
        assert_eq!(normalize_ubigeo(" 160101 "), "160101");
        assert_eq!(normalize_ubigeo(""), "000000");
        assert_eq!(normalize_ubigeo("1601012"), "1601012");
        assert_eq!(normalize_ubigeo("160101.5"), "160101.5");
    }

    #[test]
    fn indexes_names_with_last_wins_on_duplicates() {
        let doc = json!({
            "features": [
                {"properties": {"UBIGEO": "160101", "NOMBDIST": "OLD"}},
                {"properties": {"UBIGEO": 160102, "NOMBDIST": "ALTO NANAY"}},
                {"properties": {"UBIGEO": "160101", "NOMBDIST": "IQUITOS"}}
            ]
        });
        let names = district_names(&doc);
        assert_eq!(names.get("160101").map(String::as_str), Some("IQUITOS"));
        assert_eq!(names.get("160102").map(String::as_str), Some("ALTO NANAY"));
    }

    #[test]
    fn missing_name_property_maps_to_empty_string() {
        let doc = json!({"features": [{"properties": {"UBIGEO": "160103"}}]});
        let names = district_names(&doc);
        assert_eq!(names.get("160103").map(String::as_str), Some(""));
    }

    #[test]
    fn merge_leaves_input_untouched_and_fills_every_feature() {
        let boundaries = sample_boundaries();
        let before = boundaries.clone();
        let rows = vec![AggregatedRow {
            ubigeo: "160101".to_string(),
            cases: 150.0,
            population: Some(50_000.0),
            tia: Some(3.0),
        }];

        let merged = merge_metrics(&boundaries, &rows);

        assert_eq!(boundaries, before);
        let features = merged["features"].as_array().unwrap();
        for feature in features {
            let props = feature["properties"].as_object().unwrap();
            assert!(props.contains_key("CASOS"));
            assert!(props.contains_key("POBTOT"));
            assert!(props.contains_key("TIA"));
        }
        assert_eq!(features[0]["properties"]["CASOS"], json!(150.0));
        assert_eq!(features[0]["properties"]["TIA"], json!(3.0));
        // no aggregated row for 160102
        assert_eq!(features[1]["properties"]["CASOS"], Value::Null);
        assert_eq!(features[1]["properties"]["POBTOT"], Value::Null);
        assert_eq!(features[1]["properties"]["TIA"], Value::Null);
    }

    #[test]
    fn merge_overwrites_existing_metric_properties() {
        let doc = json!({
            "features": [
                {"properties": {"UBIGEO": "160101", "TIA": 99.9, "CASOS": 1}}
            ]
        });
        let merged = merge_metrics(&doc, &[]);
        let props = merged["features"][0]["properties"].as_object().unwrap();
        assert_eq!(props["TIA"], Value::Null);
        assert_eq!(props["CASOS"], Value::Null);
        assert_eq!(props["POBTOT"], Value::Null);
    }

    #[test]
    fn merge_drops_non_finite_values_to_null() {
        let boundaries = sample_boundaries();
        let rows = vec![AggregatedRow {
            ubigeo: "160101".to_string(),
            cases: 1.0,
            population: Some(f64::NAN),
            tia: Some(f64::INFINITY),
        }];
        let merged = merge_metrics(&boundaries, &rows);
        let props = merged["features"][0]["properties"].as_object().unwrap();
        assert_eq!(props["POBTOT"], Value::Null);
        assert_eq!(props["TIA"], Value::Null);
    }
}
