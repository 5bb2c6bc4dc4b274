//! `canopy routes`: print or query the route table.

use anyhow::Result;

use canopy_config::HostConfig;
use canopy_orchestrator::Registry;

use crate::terminal_output::{note_error, note_warn, render_table, Column};

pub fn run(config: &HostConfig, paths: &[String]) -> Result<()> {
    let registry = build_registry(config);

    if paths.is_empty() {
        let rows: Vec<Vec<String>> = registry
            .routes()
            .into_iter()
            .map(|(pattern, app)| {
                let container = registry
                    .get(&app)
                    .map(|d| d.container.clone())
                    .unwrap_or_default();
                vec![pattern, app, container]
            })
            .collect();
        print!(
            "{}",
            render_table(
                &[Column::new("Route"), Column::new("Application"), Column::new("Container")],
                &rows
            )
        );
        return Ok(());
    }

    let rows: Vec<Vec<String>> = paths
        .iter()
        .map(|path| match registry.resolve(path) {
            Some(m) => {
                let params = m
                    .params
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                vec![path.clone(), m.app, m.pattern, params]
            }
            None => vec![path.clone(), "-".into(), "-".into(), String::new()],
        })
        .collect();
    print!(
        "{}",
        render_table(
            &[
                Column::new("Path"),
                Column::new("Application"),
                Column::new("Route"),
                Column::new("Params"),
            ],
            &rows
        )
    );
    let unresolved = rows.iter().filter(|r| r[1] == "-").count();
    if unresolved > 0 {
        note_warn(&format!("{unresolved} path(s) matched no route"));
    }
    Ok(())
}

/// Registry of every configured application that registers cleanly.
pub fn build_registry(config: &HostConfig) -> Registry {
    let mut registry = Registry::new();
    for app in &config.applications {
        if let Err(e) = registry.register(app.clone()) {
            note_error(&format!("{}: {}", app.name, e));
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::ApplicationDescriptor;

    #[test]
    fn test_build_registry_skips_conflicts() {
        let mut config = HostConfig::default();
        config.applications.push(
            ApplicationDescriptor::new("shop", "https://cdn.example/shop.js", "#main")
                .with_route("/shop"),
        );
        config.applications.push(
            ApplicationDescriptor::new("store", "https://cdn.example/store.js", "#main")
                .with_route("/shop"),
        );
        let registry = build_registry(&config);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("/shop/cart").unwrap().app, "shop");
    }
}
