use std::collections::BTreeMap;

use stevedore_core::repo::{MaintainableRepository, ManifestEntryMetadata};

use crate::cli::ManifestCommand;

use super::{open_repository, CmdResult};

pub(crate) fn run(repo: &str, command: &ManifestCommand) -> CmdResult {
    match command {
        ManifestCommand::List { filter, sort, json } => list(repo, filter, sort, *json),
    }
}

fn list(repo: &str, filter: &[String], sort: &[String], json: bool) -> CmdResult {
    let mut labels = BTreeMap::new();
    for kv in filter {
        let Some((k, v)) = kv.split_once(':') else {
            return Err(format!("invalid list filter '{kv}', missing ':'").into());
        };
        if k.is_empty() {
            return Err(format!("invalid list filter '{kv}', missing ':'").into());
        }
        labels.insert(k.to_string(), v.to_string());
    }

    let rep = open_repository(repo)?;
    let mut items = rep.manifest_store().find_manifests(&labels)?;

    items.sort_by(|a, b| {
        for key in sort {
            let (v1, v2) = (a.labels.get(key), b.labels.get(key));
            if v1 != v2 {
                return v1.cmp(&v2);
            }
        }
        a.mod_time.cmp(&b.mod_time)
    });

    if json {
        let rows: Vec<serde_json::Value> = items.iter().map(json_row).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for it in &items {
        let manifest_type = it.labels.get("type").map(String::as_str).unwrap_or("");
        println!(
            "{} {:10} {} type:{} {}",
            it.id,
            it.length,
            it.mod_time
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S %Z"),
            manifest_type,
            sorted_label_pairs(&it.labels),
        );
    }
    Ok(())
}

fn json_row(it: &ManifestEntryMetadata) -> serde_json::Value {
    serde_json::json!({
        "id": it.id.as_str(),
        "length": it.length,
        "modTime": it.mod_time.to_rfc3339(),
        "labels": it.labels,
    })
}

/// All labels except `type`, formatted `k:v` and sorted.
fn sorted_label_pairs(labels: &BTreeMap<String, String>) -> String {
    let mut pairs: Vec<String> = labels
        .iter()
        .filter(|(k, _)| k.as_str() != "type")
        .map(|(k, v)| format!("{k}:{v}"))
        .collect();
    pairs.sort();
    pairs.join(" ")
}
