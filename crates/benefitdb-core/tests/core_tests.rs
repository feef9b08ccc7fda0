use std::fs;

use figment::providers::{Format, Toml};
use figment::Figment;
use proptest::prelude::*;
use tempfile::TempDir;

use benefitdb_core::chunker::{Chunker, ChunkingConfig};
use benefitdb_core::config::Config;
use benefitdb_core::loader::load_directory;
use benefitdb_core::primary_field::{FilenameRule, KeywordColumnDetector};
use benefitdb_core::types::{Document, FusionMode, SourceType, TableGrid, OVERLAP_MARKER};

const SAMPLE: &str = "
[페이지 1]
Ⅰ. 치료재료
제5장 중재적 시술료

Flow-diverter를 이용한 뇌동맥류 색전술 시 사용하는 색전 기구는 다음의 경우에 요양급여를 인정함

가. 급여대상
1) 직경 10mm이상의 비파열성 뇌동맥류
2) 직경 10mm미만의 비파열성 뇌동맥류 중 아래의 경우 사례별로 인정

[페이지 2]
Ⅱ. 관상동맥 스텐트

자656 경피적 관상동맥 스텐트 삽입술은 임상적 유용성이 있는 경우에 시행함을 원칙으로 함.
";

fn squash(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn doc(id: &str, text: &str) -> Document {
    Document {
        id: id.to_string(),
        filename: format!("{id}.pdf"),
        file_type: "pdf".to_string(),
        title: None,
        full_text: text.to_string(),
        pages: Vec::new(),
        tables: Vec::new(),
        code: None,
        metadata: Default::default(),
    }
}

fn small_chunker() -> Chunker {
    Chunker::new(ChunkingConfig { min_chars: 20, max_chars: 120, target_chars: 80, overlap_chars: 10 })
        .expect("chunker")
}

#[test]
fn sections_follow_titles_and_pages() {
    let chunker = Chunker::new(ChunkingConfig::default()).expect("chunker");
    let sections = chunker.split_sections(SAMPLE);
    let titles: Vec<Option<&str>> = sections.iter().map(|s| s.title.as_deref()).collect();
    assert_eq!(
        titles,
        vec![Some("Ⅰ. 치료재료"), Some("가. 급여대상"), Some("Ⅱ. 관상동맥 스텐트")]
    );
    assert_eq!(sections[0].page, Some(1));
    assert_eq!(sections[2].page, Some(2));
    assert_eq!(sections[0].level, 2);
    assert_eq!(sections[1].level, 3);
}

#[test]
fn small_sections_become_single_chunks_with_provenance() {
    let chunker = Chunker::new(ChunkingConfig::default()).expect("chunker");
    let mut d = doc("notice", SAMPLE);
    d.code = Some("N-2024-1".to_string());
    let chunks = chunker.chunk_document(&d);
    assert_eq!(chunks.len(), 3);
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c.id, format!("notice:{i}"));
        assert_eq!(c.meta.chunk_index, i);
        assert_eq!(c.meta.total_chunks, 3);
        assert_eq!(c.meta.doc_code.as_deref(), Some("N-2024-1"));
        assert!(!c.text.trim().is_empty());
    }
    assert_eq!(chunks[2].meta.section_title.as_deref(), Some("Ⅱ. 관상동맥 스텐트"));
    assert_eq!(chunks[2].meta.page, Some(2));
}

#[test]
fn heading_lines_stay_in_the_indexed_text() {
    let chunker = Chunker::new(ChunkingConfig::default()).expect("chunker");
    let text = "[페이지 3]\n직경 10mm이상의 비파열성 뇌동맥류 급여대상\n비파열성 동맥류에 한한다.\n";
    let chunks = chunker.chunk_document(&doc("n", text));
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].meta.section_title.as_deref(), Some("직경 10mm이상의 비파열성 뇌동맥류 급여대상"));
    assert_eq!(chunks[0].meta.page, Some(3));
    assert_eq!(chunks[0].text, "직경 10mm이상의 비파열성 뇌동맥류 급여대상\n비파열성 동맥류에 한한다.");
    assert!(!chunks[0].text.contains("[페이지"));
}

#[test]
fn every_chunk_after_the_first_carries_overlap() {
    let chunker = small_chunker();
    let chunks = chunker.chunk_document(&doc("d", SAMPLE));
    assert!(chunks.len() > 1);
    assert_eq!(chunks[0].meta.overlap_len, 0);
    for pair in chunks.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let marker_at = next.meta.overlap_len - OVERLAP_MARKER.len();
        let tail = &next.text[..marker_at];
        assert!(prev.body().ends_with(tail), "overlap {tail:?} comes from the previous chunk");
        assert!(tail.chars().count() <= 10);
        assert_eq!(&next.text[marker_at..next.meta.overlap_len], OVERLAP_MARKER);
    }
}

#[test]
fn oversized_paragraph_is_force_split() {
    let chunker = small_chunker();
    let words: Vec<String> = (0..60).map(|i| format!("단어{i}")).collect();
    let text = format!("머리말이 없는 본문입니다\n\n{}\n", words.join(" "));
    let chunks = chunker.chunk_document(&doc("long", &text));
    let forced: Vec<_> = chunks.iter().filter(|c| c.meta.force_split).collect();
    assert!(forced.len() >= 2);
    for c in &forced {
        assert!(c.body().chars().count() < 80);
    }
}

#[test]
fn short_trailing_buffer_is_kept() {
    let chunker = small_chunker();
    let para = "가".repeat(100);
    let text = format!("{para}\n\n{para}\n\n끝");
    let chunks = chunker.chunk_document(&doc("tail", &text));
    let last = chunks.last().expect("chunks");
    assert_eq!(last.body(), "끝");
}

#[test]
fn table_rows_become_chunks_after_text() {
    let chunker = Chunker::new(ChunkingConfig::default()).expect("chunker");
    let mut d = doc("2024_치료재료_목록", "치료재료 급여기준 안내문입니다.");
    d.filename = "2024_치료재료_목록.pdf".to_string();
    d.tables = vec![
        TableGrid {
            page_number: 3,
            table_index: 0,
            rows: vec![
                vec!["재료코드".into(), "품명".into(), "비고".into()],
                vec!["A12345".into(), "스텐트".into(), "".into()],
                vec!["B99999".into(), "카테터".into(), "소모품".into()],
            ],
        },
        TableGrid { page_number: 4, table_index: 1, rows: vec![vec!["헤더만".into()]] },
    ];
    let chunks = chunker.chunk_document(&d);
    assert_eq!(chunks.len(), 3, "one text chunk, two rows; header-only grid skipped");

    let row = &chunks[1];
    assert_eq!(row.id, "2024_치료재료_목록:1");
    assert_eq!(row.meta.source_type, SourceType::Table);
    assert_eq!(row.text, "[재료코드] A12345\n[품명] 스텐트");
    assert_eq!(row.meta.page, Some(3));
    assert_eq!(row.meta.row_index, Some(0));
    assert_eq!(row.meta.primary_field.as_deref(), Some("재료코드"));
    assert_eq!(row.meta.primary_value.as_deref(), Some("A12345"));
    assert_eq!(row.meta.extra.get("재료코드").map(String::as_str), Some("A12345"));
    assert_eq!(row.meta.overlap_len, 0);
}

#[test]
fn table_rows_of_unknown_families_have_no_primary_field() {
    let chunker = Chunker::new(ChunkingConfig::default()).expect("chunker");
    let mut d = doc("general", "");
    d.tables = vec![TableGrid {
        page_number: 1,
        table_index: 0,
        rows: vec![vec!["재료코드".into()], vec!["A1".into()]],
    }];
    let chunks = chunker.chunk_document(&d);
    assert_eq!(chunks.len(), 1);
    assert!(!chunks[0].meta.has_primary_field());
}

#[test]
fn custom_detector_recognises_other_families() {
    let detector = KeywordColumnDetector::new(vec![FilenameRule::new("검사", &["검사 코드"])]);
    let chunker = Chunker::new(ChunkingConfig::default()).expect("chunker").with_detector(Box::new(detector));
    let mut d = doc("2024_검사_목록", "");
    d.filename = "2024_검사_목록.xlsx".to_string();
    d.tables = vec![TableGrid {
        page_number: 1,
        table_index: 0,
        rows: vec![vec!["검사코드".into(), "명칭".into()], vec!["D1234".into(), "혈액검사".into()]],
    }];
    let chunks = chunker.chunk_document(&d);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].meta.primary_field.as_deref(), Some("검사코드"));
    assert_eq!(chunks[0].meta.extra.get("검사코드").map(String::as_str), Some("D1234"));
}

#[test]
fn empty_text_yields_no_chunks() {
    let chunker = Chunker::new(ChunkingConfig::default()).expect("chunker");
    assert!(chunker.chunk_text("empty", "  \n\n ").is_empty());
}

proptest! {
    #[test]
    fn bodies_reconstruct_section_content(
        paras in proptest::collection::vec("[a-z]{3,12}( [a-z]{3,12}){0,25}", 1..12)
    ) {
        let chunker = small_chunker();
        let text = paras.join("\n\n");
        let sections = chunker.split_sections(&text);
        let expected: String = sections.iter().map(|s| squash(&s.content)).collect();
        let chunks = chunker.chunk_text("p", &text);
        let rebuilt: String = chunks.iter().map(|c| squash(c.body())).collect();
        prop_assert_eq!(rebuilt, expected);
        for c in &chunks {
            prop_assert!(!c.text.trim().is_empty());
        }
    }
}

#[test]
fn load_directory_skips_malformed_documents() {
    let tmp = TempDir::new().expect("tmp");
    let dir = tmp.path();
    fs::write(dir.join("a.txt"), "Short text").expect("write");
    fs::write(
        dir.join("b.json"),
        r#"{"id": "doc-b", "filename": "b.pdf", "full_text": "본문", "code": "C-1"}"#,
    )
    .expect("write");
    fs::write(dir.join("broken.json"), "{ not json").expect("write");
    fs::write(dir.join("blank.txt"), "   ").expect("write");
    fs::write(dir.join("ignored.md"), "# nope").expect("write");

    let report = load_directory(dir);
    let ids: Vec<&str> = report.documents.iter().map(|d| d.document.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "doc-b"]);
    assert_eq!(report.documents[0].document.filename, "a.txt");
    assert_eq!(report.documents[1].document.code.as_deref(), Some("C-1"));
    assert_eq!(report.skipped.len(), 2);
}

#[test]
fn settings_merge_over_defaults() {
    let figment = Figment::new().merge(Toml::string(
        r#"
        [retrieval]
        dense_weight = 0.5
        fusion = "rrf"

        [chunking]
        target_chars = 1000
        "#,
    ));
    let settings = Config::from_figment(figment).settings().expect("settings");
    assert!((settings.retrieval.dense_weight - 0.5).abs() < f32::EPSILON);
    assert!((settings.retrieval.sparse_weight - 0.3).abs() < f32::EPSILON);
    assert_eq!(settings.retrieval.fusion, FusionMode::Rrf);
    assert_eq!(settings.retrieval.top_k, 5);
    assert_eq!(settings.chunking.target_chars, 1000);
    assert_eq!(settings.chunking.max_chars, 2500);
}

#[test]
fn settings_reject_inconsistent_values() {
    let bad_weights = Figment::new().merge(Toml::string("[retrieval]\nsparse_weight = -1.0\n"));
    assert!(Config::from_figment(bad_weights).settings().is_err());

    let bad_sizes = Figment::new().merge(Toml::string("[chunking]\ntarget_chars = 3000\n"));
    assert!(Config::from_figment(bad_sizes).settings().is_err());
}

#[test]
fn data_paths_resolve_against_base() {
    let settings = Config::from_figment(Figment::new()).settings().expect("settings");
    let paths = settings.data.resolve(std::path::Path::new("/srv/benefit"));
    assert_eq!(paths.sparse_index_dir, std::path::PathBuf::from("/srv/benefit/data/indexes/tantivy"));
}

#[test]
fn same_named_files_in_subdirectories_stay_distinct() {
    let tmp = TempDir::new().expect("tmp");
    let dir = tmp.path();
    for year in ["2023", "2024"] {
        fs::create_dir_all(dir.join(year)).expect("mkdir");
        fs::write(dir.join(year).join("notice.txt"), format!("{year}년 고시 본문")).expect("write");
    }
    fs::write(dir.join("notice.txt"), "최상위 고시").expect("write");

    let report = load_directory(dir);
    let keys: Vec<&str> = report.documents.iter().map(|d| d.key.as_str()).collect();
    assert_eq!(keys, vec!["2023/notice.txt", "2024/notice.txt", "notice.txt"]);
    let ids: Vec<&str> = report.documents.iter().map(|d| d.document.id.as_str()).collect();
    assert_eq!(ids, vec!["2023/notice", "2024/notice", "notice"]);
    assert_eq!(report.documents[1].document.filename, "2024/notice.txt");

    let chunker = small_chunker();
    let a = chunker.chunk_document(&report.documents[0].document);
    let b = chunker.chunk_document(&report.documents[1].document);
    assert_ne!(a[0].id, b[0].id);
}

#[test]
fn repeated_declared_ids_are_skipped() {
    let tmp = TempDir::new().expect("tmp");
    let dir = tmp.path();
    fs::create_dir_all(dir.join("old")).expect("mkdir");
    let body = r#"{"id": "notice-7", "full_text": "본문"}"#;
    fs::write(dir.join("a.json"), body).expect("write");
    fs::write(dir.join("old").join("a.json"), body).expect("write");

    let report = load_directory(dir);
    assert_eq!(report.documents.len(), 1);
    assert_eq!(report.documents[0].key, "a.json");
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].1.contains("duplicate document id notice-7"));
}
