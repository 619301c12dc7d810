//! Raw query-string parsing, shared by `Request::query_pairs` (C4) and the
//! parameter resolver's `query` source (C5).

/// Parse a query string into key-value pairs, preserving repetition order
/// so the resolver can bind sequence-typed parameters to all repetitions.
pub fn parse_query_string(query: Option<&str>) -> Vec<(String, String)> {
    match query {
        Some(q) => form_urlencoded::parse(q.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        None => Vec::new(),
    }
}
