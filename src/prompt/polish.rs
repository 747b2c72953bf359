use crate::knowledge::polish_angle;
use crate::meta::{MapMeta, RegionClass};
use serde_json::{json, Map, Value};

/// Normalise and sort angle strings; unparseable ones are kept verbatim.
fn polished(angles: &[String]) -> Vec<String> {
    let mut out: Vec<String> = angles
        .iter()
        .map(|a| polish_angle(a).unwrap_or_else(|_| a.clone()))
        .collect();
    out.sort();
    out
}

/// Meta as shown to the model.
///
/// Provenance fields and `others` regions are dropped, angles are
/// normalised, and the legend keeps only coloured, labelled entries sorted
/// by occupied area with model-facing field names.
pub fn prompt_view(meta: &MapMeta) -> Value {
    let regions: Map<String, Value> = meta
        .regions
        .iter()
        .filter(|(class, _)| **class != RegionClass::Others)
        .map(|(class, boxes)| (class.to_string(), json!(boxes)))
        .collect();

    let mut information = match serde_json::to_value(&meta.information) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if let Some(lon) = &meta.information.longitude {
        information.insert("longitude".to_string(), json!(polished(lon)));
    }
    if let Some(lat) = &meta.information.latitude {
        information.insert("latitude".to_string(), json!(polished(lat)));
    }

    let mut legend: Vec<_> = meta
        .legend
        .values()
        .filter(|e| e.color_hex != "#FFFFFF" && e.color_name != "White" && e.text != "unknown")
        .collect();
    legend.sort_by(|a, b| b.area.total_cmp(&a.area));
    let legend: Vec<Value> = legend
        .into_iter()
        .map(|e| {
            json!({
                "color_bndbox": e.color_bndbox,
                "text_bndbox": e.text_bndbox,
                "color": e.color,
                "color_name": e.color_name,
                "rock_type": e.text,
                "lithology": e.lithology,
                "stratigraphic_age": e.stratigraphic_age,
                "rock_area_in_main_map": e.area,
                "rock_color_in_main_map": e.color_hex,
            })
        })
        .collect();

    json!({
        "name": meta.name,
        "size": meta.size,
        "regions": regions,
        "legend": legend,
        "information": information,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{BBox, ImageSize, LegendEntry};

    fn entry(text: &str, rgb: [u8; 3], name: &str, area: f64) -> LegendEntry {
        LegendEntry {
            color_bndbox: BBox::new(0, 0, 10, 10),
            text_bndbox: BBox::new(12, 0, 50, 10),
            color: rgb,
            color_name: name.to_string(),
            color_hex: crate::vision::to_hex(rgb),
            text: text.to_string(),
            lithology: "igneous".to_string(),
            stratigraphic_age: "unknown".to_string(),
            area,
        }
    }

    #[test]
    fn test_prompt_view() {
        let mut meta = MapMeta::new("E1", "usgs", ImageSize { width: 100, height: 100 });
        meta.regions.insert(RegionClass::Title, vec![BBox::new(0, 0, 10, 10)]);
        meta.regions.insert(RegionClass::Others, vec![BBox::new(0, 0, 5, 5)]);
        meta.legend.insert(0, entry("Granite", [220, 30, 30], "Red", 0.1));
        meta.legend.insert(1, entry("Basalt", [30, 30, 220], "Blue", 0.4));
        meta.legend.insert(2, entry("Paper", [255, 255, 255], "White", 0.9));
        meta.legend.insert(3, entry("unknown", [0, 200, 0], "Green", 0.2));
        meta.information.longitude = Some(vec!["121°00'E".to_string(), "120°05'30\"E".to_string()]);

        let view = prompt_view(&meta);
        assert!(view.get("date").is_none());
        assert!(view.get("version").is_none());
        assert!(view["regions"].get("others").is_none());
        assert!(view["regions"].get("title").is_some());
        assert_eq!(view["information"]["longitude"], json!(["120°5'E", "121°0'E"]));

        let legend = view["legend"].as_array().unwrap();
        assert_eq!(legend.len(), 2);
        assert_eq!(legend[0]["rock_type"], "Basalt");
        assert_eq!(legend[0]["rock_color_in_main_map"], "#1E1EDC");
        assert_eq!(legend[1]["rock_area_in_main_map"], json!(0.1));
        assert!(legend[0].get("text").is_none());
    }
}
