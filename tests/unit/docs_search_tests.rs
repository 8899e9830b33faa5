//! Documentation catalog search and section extraction.

use std::fs;
use std::path::Path;

use csend_bridge::search::docs::{
    extract_section, render_results, search_in_file, DocCatalog, SearchOptions,
};
use csend_bridge::AppError;

const GUIDE: &str = "\
Introduction
MacTCP provides TCP and UDP streams.
Chapter 2: TCPPassiveOpen
Opens a listening connection.
The call returns when a peer connects.
Chapter 3: TCPSend
Sends data on an open stream.
Closing notes
";

fn write_doc(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).expect("write doc");
}

#[test]
fn search_reports_context_around_each_hit() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_doc(dir.path(), "Guide.txt", GUIDE);

    let options = SearchOptions {
        context_lines: 1,
        ..SearchOptions::default()
    };
    let matches = search_in_file(&dir.path().join("Guide.txt"), "tcpsend", &options)
        .expect("search");

    assert_eq!(matches.total, 1, "case-insensitive by default");
    let hit = &matches.hits[0];
    assert_eq!(hit.line, 6);
    let lines: Vec<usize> = hit.context.iter().map(|(n, _)| *n).collect();
    assert_eq!(lines, vec![5, 6, 7]);

    let rendered = matches.to_string();
    assert!(rendered.starts_with("Found 1 match(es) in Guide.txt"));
    assert!(rendered.contains(">>> Line 6: Chapter 3: TCPSend"));
    assert!(rendered.contains("    Line 5: The call returns when a peer connects."));
}

#[test]
fn huge_context_is_clamped_to_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_doc(dir.path(), "Guide.txt", GUIDE);

    let options = SearchOptions {
        context_lines: usize::MAX,
        ..SearchOptions::default()
    };
    let matches = search_in_file(&dir.path().join("Guide.txt"), "TCPPassiveOpen", &options)
        .expect("search");

    assert_eq!(matches.total, 1);
    assert_eq!(matches.hits[0].context.len(), GUIDE.split('\n').count());
}

#[test]
fn case_sensitive_search_and_truncation() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_doc(dir.path(), "Guide.txt", GUIDE);
    let path = dir.path().join("Guide.txt");

    let strict = SearchOptions {
        case_sensitive: true,
        ..SearchOptions::default()
    };
    assert_eq!(search_in_file(&path, "tcpsend", &strict).expect("search").total, 0);

    let capped = SearchOptions {
        max_results: 1,
        ..SearchOptions::default()
    };
    let matches = search_in_file(&path, "TCP", &capped).expect("search");
    assert_eq!(matches.total, 3);
    assert_eq!(matches.hits.len(), 1);
    assert!(matches.truncated());
    assert!(matches.to_string().contains("(showing first 1)"));
}

#[test]
fn invalid_regex_is_a_search_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_doc(dir.path(), "Guide.txt", GUIDE);

    let err = search_in_file(&dir.path().join("Guide.txt"), "(unclosed", &SearchOptions::default())
        .expect_err("bad regex");
    assert!(matches!(err, AppError::Search(_)));
}

#[test]
fn section_extract_reports_remaining_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_doc(dir.path(), "Guide.txt", GUIDE);
    let path = dir.path().join("Guide.txt");

    let section = extract_section(&path, "tcppassiveopen", 2)
        .expect("read")
        .expect("section present");

    assert_eq!(section.line, 3);
    assert_eq!(
        section.lines,
        vec!["Chapter 2: TCPPassiveOpen", "Opens a listening connection."]
    );
    assert!(section.remaining > 0);
    assert!(section.to_string().contains("more lines in file"));

    assert!(extract_section(&path, "Nonexistent heading", 5).expect("read").is_none());
}

#[test]
fn catalog_discovers_txt_files_and_filters_by_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_doc(dir.path(), "MacTCP_Programmers_Guide_1989.txt", GUIDE);
    write_doc(dir.path(), "Open_Transport_Guide.txt", "OTOpenEndpoint\nTCP too\n");
    write_doc(dir.path(), "notes.md", "TCP ignored");

    let catalog = DocCatalog::discover(dir.path()).expect("catalog");
    let ids: Vec<&str> = catalog.ids().collect();
    assert_eq!(ids, vec!["mactcp-programmers-guide-1989", "open-transport-guide"]);

    let all = catalog
        .search("TCP", None, &SearchOptions::default())
        .expect("search");
    assert_eq!(all.len(), 2);

    let filtered = catalog
        .search("TCP", Some("MacTCP"), &SearchOptions::default())
        .expect("search");
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].0, "mactcp-programmers-guide-1989");

    let err = catalog
        .search("TCP", Some("inside-mac"), &SearchOptions::default())
        .expect_err("no document selected");
    assert!(matches!(err, AppError::Search(ref m) if m.contains("available")));

    let listing = catalog.list();
    assert!(listing.contains("• open-transport-guide"));
    assert!(listing.contains("File: Open_Transport_Guide.txt"));
}

#[test]
fn missing_directory_and_unknown_id_fail() {
    let err = DocCatalog::discover(Path::new("/nonexistent/csend/docs")).expect_err("missing dir");
    assert!(matches!(err, AppError::Search(_)));

    let catalog = DocCatalog::from_entries([("guide".to_owned(), "/nonexistent/g.txt".into())]);
    let err = catalog.section("other", "x", 10).expect_err("unknown id");
    assert!(matches!(err, AppError::Search(ref m) if m.contains("guide")));
}

#[test]
fn empty_results_render_a_notice() {
    assert_eq!(render_results("OTBind", &[]), "No matches found for query: OTBind");
}
