use crate::{emit_success, OutputMode};
use chrono::{DateTime, Utc};
use fragstore::config::{self, FragstoreConfig};
use fragstore::document;
use fragstore::fragment::{is_tombstone, Fragment};
use fragstore::ui::{self, Icons};
use fragstore::{DocumentKey, DocumentPersistence, FragmentStore, GraphStore, OutgoingLink, Range, SqliteSource, Strategy, VertexPrimaryKey};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// `--link name=entity/id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkArg {
    pub name: String,
    pub entity: String,
    pub id: String,
}

pub fn parse_link(s: &str) -> Result<LinkArg, String> {
    let (name, target) = s
        .split_once('=')
        .ok_or_else(|| format!("expected `name=entity/id`, got `{}`", s))?;
    let (entity, id) = target
        .split_once('/')
        .ok_or_else(|| format!("expected `entity/id` after `=`, got `{}`", target))?;
    if name.is_empty() || entity.is_empty() || id.is_empty() {
        return Err(format!("empty component in link `{}`", s));
    }
    Ok(LinkArg {
        name: name.to_string(),
        entity: entity.to_string(),
        id: id.to_string(),
    })
}

pub fn read_document_arg(inline: Option<String>, file: Option<PathBuf>) -> anyhow::Result<Value> {
    let text = match (inline, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)?,
        (None, None) => anyhow::bail!("provide a document with --document or --file"),
    };
    Ok(serde_json::from_str(&text)?)
}

fn open_source(config: &FragstoreConfig) -> anyhow::Result<SqliteSource> {
    if let Some(db) = &config.database {
        config::ensure_db_dir(db)?;
    }
    Ok(SqliteSource::from_config(config)?)
}

fn require(config: &FragstoreConfig, strategy: Strategy, command: &str) -> anyhow::Result<()> {
    if config.strategy != strategy {
        anyhow::bail!("`{}` needs the {} strategy, configured strategy is {}", command, strategy, config.strategy);
    }
    Ok(())
}

/// Split consecutive fragments into per-(id, version) groups
fn split_documents(fragments: Vec<Fragment>) -> Vec<Vec<Fragment>> {
    let mut groups: Vec<Vec<Fragment>> = Vec::new();
    for fragment in fragments {
        match groups.last_mut() {
            Some(group) if group[0].id == fragment.id && group[0].version == fragment.version => group.push(fragment),
            _ => groups.push(vec![fragment]),
        }
    }
    groups
}

pub fn run_init(mode: OutputMode, path: &Path, config: &FragstoreConfig, force: bool) -> anyhow::Result<()> {
    config::write_config(path, config, force)?;
    open_source(config)?;

    let database = config.database.as_deref().map(|p| p.display().to_string()).unwrap_or_default();
    if mode.is_human() {
        ui::success(&format!("Wrote {}", path.display()));
        ui::info("Database", &database);
        ui::info("Strategy", config.strategy.as_str());
    } else {
        emit_success(mode, "init", json!({ "config": path.display().to_string(), "database": database }))?;
    }
    Ok(())
}

pub fn run_put(
    mode: OutputMode,
    config: &FragstoreConfig,
    entity: &str,
    id: &str,
    doc: &Value,
    version: DateTime<Utc>,
    links: &[LinkArg],
) -> anyhow::Result<()> {
    let key = DocumentKey::new(&config.namespace, entity, id);
    let source_key = VertexPrimaryKey::new(&config.namespace, entity, id);
    let links: Vec<OutgoingLink> = links
        .iter()
        .map(|l| OutgoingLink::new(&source_key, &l.name, &l.entity, &l.id))
        .collect();
    if !links.is_empty() && config.strategy == Strategy::Fragments {
        ui::warn("links are only kept by the graph strategy");
    }

    let source = open_source(config)?;
    let tx = source.begin()?;
    DocumentPersistence::from_config(config).write_document(&tx, &key, version, doc, &links)?;
    let statistics = tx.commit()?;

    if mode.is_human() {
        ui::success(&format!("Stored {} at {}", ui::key(&key.to_string()), version.to_rfc3339()));
        let table = ui::statistics_table(&statistics);
        if !table.is_empty() {
            println!("{}", table);
        }
    } else {
        let counts: serde_json::Map<String, Value> = statistics.iter().map(|(k, v)| (k.to_string(), json!(v))).collect();
        emit_success(mode, "put", json!({ "key": key.to_string(), "version": version, "statistics": counts }))?;
    }
    Ok(())
}

pub fn run_get(
    mode: OutputMode,
    config: &FragstoreConfig,
    entity: &str,
    id: &str,
    at: DateTime<Utc>,
    show_fragments: bool,
) -> anyhow::Result<()> {
    let key = DocumentKey::new(&config.namespace, entity, id);
    let source = open_source(config)?;
    let tx = source.begin_read_only()?;

    if show_fragments {
        require(config, Strategy::Fragments, "get --fragments")?;
        let fragments = FragmentStore::with_options(&tx, config.options())
            .read(&key.namespace, &key.entity, &key.id, at)
            .collect_all()?;
        tx.cancel()?;
        if mode.is_human() {
            match fragments.first() {
                Some(first) => {
                    ui::section(Icons::FILE, &format!("{} @ {}", key, first.version.to_rfc3339()));
                    println!("{}", ui::fragment_table(&fragments));
                }
                None => ui::warn(&format!("{} has no revision at {}", key, at.to_rfc3339())),
            }
        } else {
            emit_success(mode, "get", serde_json::to_value(&fragments)?)?;
        }
        return Ok(());
    }

    let doc = DocumentPersistence::from_config(config).read_document(&tx, &key, at)?;
    tx.cancel()?;
    let Some(doc) = doc else {
        anyhow::bail!("{} not found at {}", key, at.to_rfc3339());
    };
    if mode.is_human() {
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        emit_success(mode, "get", json!({ "key": key.to_string(), "document": doc }))?;
    }
    Ok(())
}

pub fn run_history(
    mode: OutputMode,
    config: &FragstoreConfig,
    entity: &str,
    id: &str,
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    require(config, Strategy::Fragments, "history")?;
    let key = DocumentKey::new(&config.namespace, entity, id);
    let source = open_source(config)?;
    let tx = source.begin_read_only()?;
    let range = Range { after, before, limit };
    let fragments = FragmentStore::with_options(&tx, config.options())
        .read_versions(&key.namespace, &key.entity, &key.id, &range)
        .collect_all()?;
    tx.cancel()?;

    let revisions = split_documents(fragments);
    if mode.is_human() {
        if revisions.is_empty() {
            ui::warn(&format!("{} has no revisions in range", key));
            return Ok(());
        }
        ui::section(Icons::CLOCK, &format!("History of {}", ui::key(&key.to_string())));
        let rows: Vec<(String, usize, bool)> = revisions
            .iter()
            .map(|r| (r[0].version.to_rfc3339(), r.len(), is_tombstone(r)))
            .collect();
        println!("{}", ui::version_table(&rows));
    } else {
        let mut entries = Vec::with_capacity(revisions.len());
        for revision in &revisions {
            entries.push(json!({
                "version": revision[0].version,
                "deleted": is_tombstone(revision),
                "document": document::recompose(revision)?,
            }));
        }
        emit_success(mode, "history", Value::Array(entries))?;
    }
    Ok(())
}

pub fn run_list(mode: OutputMode, config: &FragstoreConfig, entity: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
    let source = open_source(config)?;
    let tx = source.begin_read_only()?;
    let documents = DocumentPersistence::from_config(config).list_documents(&tx, &config.namespace, entity, at)?;
    tx.cancel()?;

    if mode.is_human() {
        ui::section(Icons::DATABASE, &format!("{} documents in /{}/{}", documents.len(), config.namespace, entity));
        for (id, doc) in &documents {
            println!("  {} {}", ui::key(id), ui::muted(&doc.to_string()));
        }
    } else {
        let data: serde_json::Map<String, Value> = documents.into_iter().collect();
        emit_success(mode, "list", Value::Object(data))?;
    }
    Ok(())
}

pub fn run_find(
    mode: OutputMode,
    config: &FragstoreConfig,
    entity: &str,
    path: &str,
    value: &str,
    at: DateTime<Utc>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    require(config, Strategy::Fragments, "find")?;
    let source = open_source(config)?;
    let tx = source.begin_read_only()?;
    let range = Range { limit, ..Range::unbounded() };
    let fragments = FragmentStore::with_options(&tx, config.options())
        .find(&config.namespace, entity, at, path, value.as_bytes(), &range)?
        .collect_all()?;
    tx.cancel()?;

    let mut matches = Vec::new();
    for group in split_documents(fragments) {
        if let Some(doc) = document::recompose(&group)? {
            matches.push((group[0].id.clone(), doc));
        }
    }

    if mode.is_human() {
        ui::section(Icons::SEARCH, &format!("{} matches for {} = {}", matches.len(), path, value));
        for (id, doc) in &matches {
            println!("  {} {}", ui::key(id), ui::muted(&doc.to_string()));
        }
    } else {
        let data: serde_json::Map<String, Value> = matches.into_iter().collect();
        emit_success(mode, "find", Value::Object(data))?;
    }
    Ok(())
}

pub fn run_delete(
    mode: OutputMode,
    config: &FragstoreConfig,
    entity: &str,
    id: &str,
    version: DateTime<Utc>,
    purge: bool,
) -> anyhow::Result<()> {
    let key = DocumentKey::new(&config.namespace, entity, id);
    let source = open_source(config)?;
    let tx = source.begin()?;

    let removed = match (purge, config.strategy) {
        (true, Strategy::Fragments) => {
            FragmentStore::with_options(&tx, config.options()).delete_all_versions(&key.namespace, &key.entity, &key.id)? > 0
        }
        (true, Strategy::Graph) => GraphStore::with_options(&tx, config.options())
            .delete_entity(&VertexPrimaryKey::new(&key.namespace, &key.entity, &key.id))?,
        (false, _) => DocumentPersistence::from_config(config).delete_document(&tx, &key, version)?,
    };
    tx.commit()?;

    if mode.is_human() {
        if removed {
            ui::success(&format!("{} Deleted {}", Icons::DEL, ui::key(&key.to_string())));
        } else {
            ui::warn(&format!("{} did not exist", key));
        }
    } else {
        emit_success(mode, "delete", json!({ "key": key.to_string(), "removed": removed, "purge": purge }))?;
    }
    Ok(())
}

pub fn run_links(mode: OutputMode, config: &FragstoreConfig, entity: &str, id: &str, incoming: bool) -> anyhow::Result<()> {
    require(config, Strategy::Graph, "links")?;
    let key = VertexPrimaryKey::new(&config.namespace, entity, id);
    let source = open_source(config)?;
    let tx = source.begin_read_only()?;
    let graph = GraphStore::with_options(&tx, config.options());
    let links = if incoming {
        graph.get_incoming_links(&key)?
    } else {
        graph.get_outgoing_links(&key)?
    };
    tx.cancel()?;

    if mode.is_human() {
        let direction = if incoming { "Incoming" } else { "Outgoing" };
        ui::section(Icons::LINK, &format!("{} links of {}", direction, ui::key(&key.uri())));
        if links.is_empty() {
            println!("  {}", ui::dim("none"));
        } else {
            println!("{}", ui::link_table(&links));
        }
    } else {
        emit_success(mode, "links", serde_json::to_value(&links)?)?;
    }
    Ok(())
}
