//! # CLI Command Implementations

use super::CliError;
use crate::api::{self, CommandResponse};
use crate::client::QuarryClient;
use crate::engine;
use crate::gateway::{Gateway, WorkerReply, extract_in_process};
use quarry_core::fingerprint::is_known_failed;
use quarry_core::vocab::{GRAPH_FILESYSTEM, NIE_INTERPRETED_AS};
use quarry_core::{
    Config, ExtractionFailure, GraphName, ModuleManager, Query, QuarryError, ResourceGraph, Term,
    Uri, guess_mime,
};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn client(url: &str) -> QuarryClient {
    QuarryClient::new(url, api::get_api_key_from_env())
}

fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

fn absolute(path: &Path) -> Result<PathBuf, QuarryError> {
    std::path::absolute(path)
        .map_err(|e| QuarryError::Io(format!("{}: {}", path.display(), e)))
}

/// Print a bare command reply and turn `success: false` into an error.
fn finish(json_mode: bool, response: CommandResponse, done: &str) -> Result<(), CliError> {
    if json_mode {
        print_json(&response);
    }
    if !response.success {
        return Err(CliError::Failed(
            response.error.unwrap_or_else(|| "request failed".to_string()),
        ));
    }
    if !json_mode {
        println!("{}", done);
    }
    Ok(())
}

// =============================================================================
// DAEMON COMMAND
// =============================================================================

/// Resolves on Ctrl+C. If the handler cannot be installed it never
/// resolves, so the daemon keeps running.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

/// Run the engine and serve its control surface until Ctrl+C.
pub async fn cmd_daemon(config: Config, host: &str, port: u16) -> Result<(), CliError> {
    let graph = engine::open_graph(&config.storage)?;
    let gateway = Gateway::from_config(Arc::new(ModuleManager::builtin()), &config.engine);

    tracing::info!(
        database = %config.storage.database.display(),
        roots = config.indexing.roots().len(),
        isolation = ?config.engine.isolation,
        monitors = config.indexing.enable_monitors,
        "Starting indexer"
    );
    let handle = engine::spawn(config, gateway, graph).await?;

    let addr = format!("{}:{}", host, port);
    let served = api::run_server(&addr, handle.clone(), shutdown_signal()).await;

    handle.shutdown().await?;
    tracing::info!("Indexer stopped");
    served.map_err(CliError::from)
}

// =============================================================================
// DAEMON CLIENT COMMANDS
// =============================================================================

pub async fn cmd_status(url: &str, json_mode: bool) -> Result<(), CliError> {
    let status = client(url).status().await?;

    if json_mode {
        print_json(&status);
        return Ok(());
    }

    let text = |key: &str| status[key].as_str().unwrap_or("-").to_string();
    let number = |key: &str| status[key].as_u64().unwrap_or(0);

    println!("Quarry Status");
    println!("=============");
    match status["reason"].as_str() {
        Some(reason) => println!("State:    {} ({})", text("state"), reason),
        None => println!("State:    {}", text("state")),
    }
    println!("Progress: {}%", number("progress"));
    println!("Queued:   {}", number("queued"));
    println!("Running:  {}", number("in_flight"));
    println!("Pending:  {} commits", number("pending_commits"));
    println!("Quads:    {}", number("quads"));

    if let Some(graphs) = status["graphs"].as_object() {
        println!();
        println!("Graphs:");
        for (name, count) in graphs {
            println!("  {:<20} {}", name, count.as_u64().unwrap_or(0));
        }
    }
    if let Some(sources) = status["datasources"].as_array() {
        println!();
        println!("Data sources:");
        for source in sources {
            let flag = match (source["available"].as_bool(), source["busy"].as_bool()) {
                (Some(false), _) => " (unavailable)",
                (_, Some(true)) => " (busy)",
                _ => "",
            };
            println!(
                "  {} [{}]{}",
                source["root"].as_str().unwrap_or("?"),
                source["kind"].as_str().unwrap_or("?"),
                flag
            );
        }
    }
    if let Some(inhibitors) = status["inhibitors"].as_array() {
        for inhibitor in inhibitors {
            println!(
                "Paused by {} (cookie {}): {}",
                inhibitor["application"].as_str().unwrap_or("?"),
                inhibitor["cookie"],
                inhibitor["reason"].as_str().unwrap_or("")
            );
        }
    }
    Ok(())
}

/// Index a location through the daemon and wait for the result.
pub async fn cmd_index(
    url: &str,
    json_mode: bool,
    path: &Path,
    recursive: bool,
    graphs: Vec<String>,
) -> Result<(), CliError> {
    let path = absolute(path)?;
    let graphs = if graphs.is_empty() {
        None
    } else {
        Some(graphs.into_iter().map(GraphName::new).collect::<BTreeSet<_>>())
    };

    let response = client(url).index(&path, recursive, graphs).await?;
    if json_mode {
        print_json(&response);
    }
    if !response.success {
        let reason = response
            .error
            .or(response.message)
            .unwrap_or_else(|| "indexing failed".to_string());
        return Err(CliError::Failed(format!("{}: {}", path.display(), reason)));
    }
    if !json_mode {
        println!("Indexed {}", path.display());
    }
    Ok(())
}

pub async fn cmd_start(url: &str, json_mode: bool) -> Result<(), CliError> {
    let response = client(url).start().await?;
    finish(json_mode, response, "Indexing started")
}

pub async fn cmd_stop(url: &str, json_mode: bool) -> Result<(), CliError> {
    let response = client(url).stop().await?;
    finish(json_mode, response, "Indexing stopped")
}

pub async fn cmd_pause(
    url: &str,
    json_mode: bool,
    application: &str,
    reason: &str,
) -> Result<(), CliError> {
    let response = client(url).pause(application, reason).await?;
    if json_mode {
        print_json(&response);
    }
    match (response.success, response.cookie) {
        (true, Some(cookie)) => {
            if !json_mode {
                println!("Paused, resume with: quarry resume {}", cookie);
            }
            Ok(())
        }
        _ => Err(CliError::Failed(
            response.error.unwrap_or_else(|| "pause failed".to_string()),
        )),
    }
}

pub async fn cmd_resume(url: &str, json_mode: bool, cookie: u32) -> Result<(), CliError> {
    let response = client(url).resume(cookie).await?;
    finish(json_mode, response, "Pause released")
}

pub async fn cmd_query(
    url: &str,
    json_mode: bool,
    patterns: &str,
    graph: Option<String>,
    limit: Option<usize>,
) -> Result<(), CliError> {
    let mut query = Query::parse(patterns)?;
    if let Some(graph) = graph {
        query = query.in_graph(GraphName::new(graph));
    }
    if let Some(limit) = limit {
        query = query.limit(limit);
    }

    let response = client(url).query(&query).await?;
    if json_mode {
        print_json(&response);
    }
    if !response.success {
        return Err(CliError::Failed(
            response.error.unwrap_or_else(|| "query failed".to_string()),
        ));
    }
    if !json_mode {
        for row in &response.rows {
            let cells: Vec<String> = row.iter().map(|(k, v)| format!("?{}={}", k, v)).collect();
            println!("{}", cells.join("\t"));
        }
        println!("({} rows)", response.rows.len());
    }
    Ok(())
}

// =============================================================================
// INFO COMMAND
// =============================================================================

/// Every graph's view of one subject, with values rendered as text.
fn describe(
    graph: &ResourceGraph,
    subject: &Uri,
) -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
    graph
        .graphs_of(subject)
        .into_iter()
        .filter_map(|g| {
            let props = graph.properties(&g, subject)?;
            let rendered = props
                .iter()
                .map(|(p, values)| {
                    (
                        p.to_string(),
                        values.iter().map(Term::to_string).collect(),
                    )
                })
                .collect();
            Some((g.to_string(), rendered))
        })
        .collect()
}

/// Show what the index holds for a path. Opens the store directly, so the
/// daemon must not be running.
pub fn cmd_info(config: &Config, json_mode: bool, path: &Path) -> Result<(), CliError> {
    let db = &config.storage.database;
    if !db.exists() {
        return Err(CliError::Failed(format!("no index at {}", db.display())));
    }
    let graph = ResourceGraph::open(db)?;
    let path = absolute(path)?;
    let file = Uri::from_path(&path);

    if !graph.contains_subject(&file) {
        return Err(CliError::Failed(format!("{} is not indexed", path.display())));
    }

    let fs_graph = GraphName::new(GRAPH_FILESYSTEM);
    let content: Vec<Uri> = graph
        .graphs_of(&file)
        .iter()
        .flat_map(|g| graph.values(g, &file, NIE_INTERPRETED_AS))
        .filter_map(|t| t.as_uri().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let failed = is_known_failed(&graph, &file);

    let mut resources = vec![(file.clone(), describe(&graph, &file))];
    resources.extend(content.iter().map(|c| (c.clone(), describe(&graph, c))));

    if json_mode {
        let output: Vec<Value> = resources
            .iter()
            .map(|(subject, graphs)| json!({ "subject": subject.as_str(), "graphs": graphs }))
            .collect();
        print_json(&json!({
            "path": path,
            "extraction_failed": failed,
            "in_filesystem_graph": graph.contains_in(&fs_graph, &file),
            "resources": output,
        }));
        return Ok(());
    }

    println!("{}", path.display());
    if failed {
        println!("  (last extraction failed)");
    }
    for (subject, graphs) in &resources {
        println!();
        println!("{}", subject);
        for (name, props) in graphs {
            println!("  [{}]", name);
            for (predicate, values) in props {
                for value in values {
                    println!("    {:<28} {}", predicate, value);
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// EXTRACT COMMAND
// =============================================================================

/// Run one extractor in this process. With `worker`, the outcome is printed
/// as one JSON `WorkerReply` line and failures are part of the reply.
pub fn cmd_extract(
    json_mode: bool,
    path: &Path,
    worker: bool,
    module: Option<String>,
    mime: Option<String>,
) -> Result<(), CliError> {
    let modules = ModuleManager::builtin();
    let mime = mime.unwrap_or_else(|| guess_mime(path, path.is_dir()));
    let module = module.or_else(|| {
        modules
            .for_mime(&mime)
            .map(|m| m.info().name.to_string())
    });

    let result = match &module {
        Some(name) => extract_in_process(&modules, name, path, &mime),
        None => Err(ExtractionFailure::Unsupported(format!(
            "no module handles {}",
            mime
        ))),
    };

    if worker {
        let reply = WorkerReply::from(result);
        let line = serde_json::to_string(&reply)
            .map_err(|e| QuarryError::SerializationError(e.to_string()))?;
        println!("{}", line);
        return Ok(());
    }

    let metadata = result.map_err(|f| CliError::Failed(format!("{}: {}", path.display(), f)))?;
    if json_mode {
        print_json(&json!({
            "path": path,
            "mime": mime,
            "module": module,
            "metadata": metadata,
        }));
        return Ok(());
    }

    println!("{} ({}, module {})", path.display(), mime, module.unwrap_or_default());
    println!("Types: {}", metadata.types.join(", "));
    for (predicate, value) in &metadata.properties {
        println!("  {:<28} {}", predicate, value);
    }
    for resource in &metadata.resources {
        println!("{} [{}]", resource.subject, resource.types.join(", "));
        for (predicate, value) in &resource.properties {
            println!("  {:<28} {}", predicate, value);
        }
    }
    Ok(())
}

// =============================================================================
// RESET COMMAND
// =============================================================================

/// Delete the index. The next daemon start rebuilds it from the filesystem.
pub fn cmd_reset(config: &Config, force: bool) -> Result<(), CliError> {
    let db = &config.storage.database;
    if !db.exists() {
        println!("No index at {}", db.display());
        return Ok(());
    }
    if !force {
        return Err(CliError::Failed(format!(
            "this deletes {}. Use --force to confirm.",
            db.display()
        )));
    }
    std::fs::remove_file(db)
        .map_err(|e| QuarryError::Io(format!("cannot remove {}: {}", db.display(), e)))?;
    println!("Deleted {}", db.display());
    Ok(())
}
