// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::fs;
use tabula::{
    preview, preview_file, Aggregation, ChartKind, ChartRequest, Column, Dataset, SortOrder,
    StorageContext, Tabula, TopN, AppConfig,
};

fn write_csv(ctx: &StorageContext, name: &str, body: &str) {
    fs::create_dir_all(ctx.upload_dir()).unwrap();
    fs::write(ctx.upload_dir().join(name), body).unwrap();
}

#[test]
fn worked_example_from_file() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let ctx = StorageContext::new(root.path().join("up"), root.path().join("data"));
    write_csv(&ctx, "sales.csv", "cat,val\nA,10\nB,5\nA,3\n");

    let request = ChartRequest::from_json(
        r#"{"filename":"sales.csv","vizType":"bar","xColumn":"cat","yColumn":"val",
            "yAggregation":"sum","sortColumn":"y_column","sortOrder":"desc","topN":1}"#,
    )?;
    let spec = preview_file(&ctx, &request)?;
    let rendered = spec.to_json()?;
    assert_eq!(rendered["title"], json!("Bar Chart"));
    assert_eq!(rendered["data"]["x"], json!(["A"]));
    assert_eq!(rendered["data"]["y"], json!([13]));
    assert_eq!(rendered["rowCount"], json!(1));
    Ok(())
}

#[test]
fn missing_file_is_not_found() {
    let root = tempfile::tempdir().unwrap();
    let ctx = StorageContext::new(root.path().join("up"), root.path().join("data"));
    let request = ChartRequest::new("ghost.csv", ChartKind::Histogram, "x");
    let err = preview_file(&ctx, &request).unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[test]
fn facade_answers_json_bodies() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut config = AppConfig::default();
    config.storage.upload_dir = root.path().join("up");
    config.storage.data_dir = root.path().join("data");
    let tabula = Tabula::new(&config);
    write_csv(
        tabula.storage(),
        "fruit.csv",
        "fruit,region,qty\napple,N,3\npear,S,1\napple,S,2\nfig,N,\n",
    );

    let body = r#"{"filename":"fruit.csv","vizType":"bar","xColumn":"fruit","yColumn":"qty",
                   "yAggregation":"avg","groupBy":"region","sortColumn":"fruit"}"#;
    let chart = tabula.preview_json(body)?;
    assert_eq!(chart["encoding"], json!({"x": "fruit", "y": "qty_avg", "color": "region"}));
    assert_eq!(chart["data"]["x"], json!(["apple", "apple", "fig", "pear"]));
    assert_eq!(chart["data"]["y"], json!([3.0, 2.0, null, 1.0]));
    let names: Vec<_> = chart["traces"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].clone())
        .collect();
    assert_eq!(names, vec![json!("N"), json!("S")]);

    assert_eq!(tabula.list_files()?, vec!["fruit.csv".to_string()]);
    let profile = tabula.inspect("fruit.csv")?;
    assert_eq!(profile.dtypes["qty"], "integer");
    assert_eq!(profile.column_stats["qty"].missing, 1);
    Ok(())
}

#[test]
fn sort_happens_before_limit() {
    let dataset = Dataset::from_columns(
        "s",
        vec![
            ("item", Column::from_str_values(vec![Some("a"), Some("b"), Some("c"), Some("d")])),
            ("score", Column::from_i64(vec![Some(1), Some(9), Some(4), Some(7)])),
        ],
    )
    .unwrap();
    let request = ChartRequest::new("s.csv", ChartKind::Bar, "item")
        .y("score")
        .sort("score", SortOrder::Desc)
        .top_n(TopN::new(2).unwrap());
    let spec = preview(&dataset, &request).unwrap();
    assert_eq!(spec.data.x, vec![json!("b"), json!("d")]);
}

#[test]
fn bad_top_n_values_are_rejected() {
    for top_n in [json!(0), json!(-5), json!("abc")] {
        let body = json!({
            "filename": "a.csv", "vizType": "bar", "xColumn": "x", "topN": top_n
        });
        let err = ChartRequest::from_json(&body.to_string()).unwrap_err();
        assert!(err.to_string().contains("positive integer"), "{err}");
    }
}

#[test]
fn spec_arrays_mirror_the_table() {
    let dataset = Dataset::from_columns(
        "r",
        vec![
            ("t", Column::from_i64(vec![Some(3), Some(1), Some(2)])),
            ("v", Column::from_f64(vec![Some(0.5), None, Some(2.5)])),
        ],
    )
    .unwrap();
    let request = ChartRequest::new("r.csv", ChartKind::Line, "t").y("v");
    let spec = preview(&dataset, &request).unwrap();
    assert_eq!(spec.row_count, dataset.row_count());
    assert_eq!(spec.data.x, vec![json!(1), json!(2), json!(3)]);
    assert_eq!(spec.data.y, Some(vec![json!(null), json!(2.5), json!(0.5)]));
}

proptest! {
    #[test]
    fn count_covers_every_row(cats in prop::collection::vec(0u8..6, 1..60)) {
        let labels: Vec<Option<String>> = cats.iter().map(|c| Some(format!("k{c}"))).collect();
        let dataset = Dataset::from_columns(
            "p",
            vec![("k", Column::from_str_values(labels))],
        )
        .unwrap();
        let request = ChartRequest::new("p.csv", ChartKind::Bar, "k").aggregate(Aggregation::Count);
        let spec = preview(&dataset, &request).unwrap();
        let distinct: HashSet<u8> = cats.iter().copied().collect();
        prop_assert_eq!(spec.row_count, distinct.len());
        let total: i64 = spec
            .data
            .y
            .unwrap()
            .iter()
            .map(|v| v.as_i64().unwrap())
            .sum();
        prop_assert_eq!(total as usize, cats.len());
    }
}
