use crate::fragment::Fragment;
use crate::graph::OutgoingLink;
use crate::storage::TransactionStatistics;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct FragmentRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Type")]
    fragment_type: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Fragments")]
    fragments: usize,
    #[tabled(rename = "State")]
    state: String,
}

#[derive(Tabled)]
struct LinkRow {
    #[tabled(rename = "Relationship")]
    name: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: String,
}

#[derive(Tabled)]
struct StatRow {
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Rows")]
    rows: u64,
}

fn render<T: Tabled>(rows: &[T]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn fragment_table(fragments: &[Fragment]) -> String {
    let rows: Vec<FragmentRow> = fragments
        .iter()
        .map(|f| FragmentRow {
            path: if f.path.is_empty() { "(root)".to_string() } else { f.path.clone() },
            fragment_type: f.fragment_type.to_string(),
            value: f.value_str().unwrap_or("").to_string(),
        })
        .collect();
    render(&rows)
}

/// One row per version: `(version, fragment count, deleted)`
pub fn version_table(versions: &[(String, usize, bool)]) -> String {
    let rows: Vec<VersionRow> = versions
        .iter()
        .map(|(version, fragments, deleted)| VersionRow {
            version: version.clone(),
            fragments: *fragments,
            state: if *deleted { "deleted" } else { "live" }.to_string(),
        })
        .collect();
    render(&rows)
}

pub fn link_table(links: &[OutgoingLink]) -> String {
    let rows: Vec<LinkRow> = links
        .iter()
        .map(|link| LinkRow {
            name: link.relationship_name.clone(),
            from: link.source().uri(),
            to: link.target().uri(),
        })
        .collect();
    render(&rows)
}

pub fn statistics_table(statistics: &TransactionStatistics) -> String {
    let rows: Vec<StatRow> = statistics
        .iter()
        .map(|(operation, rows)| StatRow {
            operation: operation.to_string(),
            rows,
        })
        .collect();
    render(&rows)
}
