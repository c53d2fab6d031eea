/// One invocation of a duplicate search against the index.
#[derive(Debug, Clone)]
pub struct ScanSession {
    pub id: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub search_type: String,
    pub namespace: String,
    pub files_processed: i64,
    pub clusters: i64,
}

/// Row counts of one index namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceStats {
    pub namespace: String,
    pub signatures: i64,
    pub fingerprints: i64,
    pub links: i64,
}

#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub namespaces: Vec<NamespaceStats>,
    pub sessions: i64,
}
