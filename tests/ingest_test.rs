mod common;

use std::fs;
use std::path::Path;
use tempfile::tempdir;

use common::*;
use photo_archive::{CatalogRegistry, IngestError, IngestReport, Ingestor};

async fn ingest(source: &Path, archive: &Path) -> (IngestReport, Ingestor) {
    let mut registry = CatalogRegistry::new();
    let ingestor = Ingestor::open(&mut registry, archive, test_config()).unwrap();
    let report = ingestor.run(source).await.unwrap();
    (report, ingestor)
}

fn entries(ingestor: &Ingestor) -> Vec<photo_archive::CatalogEntry> {
    ingestor.catalog().lock().unwrap().entries().unwrap()
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let archive = tmp.path().join("archive");
    put(&source, "one.jpg", &jpeg(320, 240, 1), JAN_2024);
    put(&source, "nested/two.png", &png(100, 300, 2), JAN_2024);
    put(&source, "nested/deeper/three.jpg", &jpeg(50, 50, 3), JAN_2024);
    put(&source, "notes.txt", b"not a photo", JAN_2024);

    let (first, ingestor) = ingest(&source, &archive).await;
    assert_eq!(first.discovered, 3);
    assert_eq!(first.cataloged, 3);
    assert_eq!(first.failed, 0);
    let files_after_first = archive_files(&archive);
    let entries_after_first = entries(&ingestor);
    ingestor.close();

    let (second, ingestor) = ingest(&source, &archive).await;
    assert_eq!(second.cataloged, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.failed, 0);
    assert_eq!(archive_files(&archive), files_after_first);
    assert_eq!(entries(&ingestor), entries_after_first);
}

#[tokio::test]
async fn test_duplicate_bytes_make_one_entry() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let archive = tmp.path().join("archive");
    let bytes = jpeg_with_capture_date(400, 300, 7, "2023:05:01 09:15:00");
    put(&source, "IMG_0001.jpg", &bytes, JAN_2024);
    put(&source, "backup/IMG_0001.jpg", &bytes, JAN_2024);

    let (report, ingestor) = ingest(&source, &archive).await;
    assert_eq!(report.cataloged, 1);
    assert_eq!(report.skipped, 1);

    let entries = entries(&ingestor);
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.dest_path, "2023/05/IMG_0001.jpg");
    assert_eq!((entry.year, entry.month), (2023, 5));
    assert_eq!(entry.capture_date.to_rfc3339(), "2023-05-01T09:15:00+00:00");
    assert_eq!(fs::read(archive.join(&entry.dest_path)).unwrap(), bytes);
    assert_eq!(entry.content_hash.len(), 64);
}

#[tokio::test]
async fn test_same_name_different_content_gets_suffix() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let archive = tmp.path().join("archive");
    let first = put(&source, "x/a.jpg", &jpeg(64, 64, 10), JAN_2024);
    put(&source, "y/a.jpg", &jpeg(64, 64, 20), JAN_2024);

    let (report, ingestor) = ingest(&source, &archive).await;
    assert_eq!(report.cataloged, 2);

    let mut dests: Vec<String> = entries(&ingestor).into_iter().map(|e| e.dest_path).collect();
    dests.sort();
    assert_eq!(dests, vec!["2024/01/a-1.jpg", "2024/01/a.jpg"]);

    // Discovery order decides who gets the plain name
    assert_eq!(
        fs::read(archive.join("2024/01/a.jpg")).unwrap(),
        fs::read(first).unwrap()
    );
    assert!(archive.join("thumbs/2024/01/a.webp").exists());
    assert!(archive.join("thumbs/2024/01/a-1.jpeg").exists());
}

#[tokio::test]
async fn test_missing_metadata_uses_mtime() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let archive = tmp.path().join("archive");
    put(&source, "plain.png", &png(30, 20, 4), JAN_2024);

    let (report, ingestor) = ingest(&source, &archive).await;
    assert_eq!(report.cataloged, 1);

    let entry = &entries(&ingestor)[0];
    assert_eq!(entry.capture_date.to_rfc3339(), "2024-01-15T12:00:00+00:00");
    assert_eq!(entry.dest_path, "2024/01/plain.png");
}

#[tokio::test]
async fn test_thumbnails_fit_the_box() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let archive = tmp.path().join("archive");
    put(&source, "wide.jpg", &jpeg(640, 480, 5), JAN_2024);
    put(&source, "tall.png", &png(90, 600, 6), JAN_2024);
    put(&source, "tiny.png", &png(40, 10, 7), JAN_2024);

    let (report, ingestor) = ingest(&source, &archive).await;
    assert_eq!(report.cataloged, 3);

    for entry in entries(&ingestor) {
        let dims = entry.thumb.expect("thumbnail dimensions recorded");
        assert!(dims.width <= 200 && dims.height <= 200);

        let (orig_w, orig_h) = image::image_dimensions(archive.join(&entry.dest_path)).unwrap();
        assert!(dims.width <= orig_w && dims.height <= orig_h);
        let ratio = orig_w as f64 / orig_h as f64;
        let thumb_ratio = dims.width as f64 / dims.height as f64;
        assert!((ratio - thumb_ratio).abs() / ratio < 0.05, "{}", entry.dest_path);

        for rel in [entry.thumb_webp_path(), entry.thumb_jpeg_path()] {
            let on_disk = image::image_dimensions(archive.join(&rel)).unwrap();
            assert_eq!(on_disk, (dims.width, dims.height), "{rel}");
        }
    }

    let wide = entries(&ingestor)
        .into_iter()
        .find(|e| e.dest_path.ends_with("wide.jpg"))
        .unwrap();
    assert_eq!(wide.thumb.map(|t| (t.width, t.height)), Some((200, 150)));
}

#[tokio::test]
async fn test_corrupt_file_is_isolated() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let archive = tmp.path().join("archive");
    put(&source, "a_good.jpg", &jpeg(80, 60, 1), JAN_2024);
    let bad = put(&source, "b_bad.jpg", b"\xff\xd8\xff truncated garbage", JAN_2024);
    put(&source, "c_good.png", &png(80, 60, 2), JAN_2024);
    put(&source, "d_good.jpg", &jpeg(80, 60, 3), JAN_2024);

    let (report, ingestor) = ingest(&source, &archive).await;
    assert_eq!(report.discovered, 4);
    assert_eq!(report.cataloged, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].path.ends_with("b_bad.jpg"));
    assert!(report.failures[0].message.contains("b_bad.jpg"));

    assert_eq!(entries(&ingestor).len(), 3);
    // Nothing of the failed file reaches the archive
    assert!(archive_files(&archive).iter().all(|f| !f.contains("b_bad")));
    assert!(bad.exists());
}

#[tokio::test]
async fn test_raw_uses_embedded_preview() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let archive = tmp.path().join("archive");
    let mut nef = b"fake raw header, sensor data follows".to_vec();
    nef.extend_from_slice(&[0u8; 256]);
    nef.extend_from_slice(&jpeg(300, 200, 9));
    nef.extend_from_slice(&[0u8; 64]);
    put(&source, "DSC_0001.NEF", &nef, JAN_2024);
    put(&source, "IMG_0002.heic", b"ftypheic not decodable", JAN_2024);

    let (report, ingestor) = ingest(&source, &archive).await;
    assert_eq!(report.cataloged, 1);
    assert_eq!(report.failed, 1);
    assert!(report.failures[0].path.ends_with("IMG_0002.heic"));

    let entry = &entries(&ingestor)[0];
    assert_eq!(entry.dest_path, "2024/01/DSC_0001.NEF");
    assert_eq!(entry.thumb.map(|t| (t.width, t.height)), Some((200, 133)));
}

#[tokio::test]
async fn test_archive_inside_source_is_not_reingested() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().to_path_buf();
    let archive = tmp.path().join("archive");
    put(&source, "photo.jpg", &jpeg(120, 90, 1), JAN_2024);

    let (first, ingestor) = ingest(&source, &archive).await;
    assert_eq!(first.cataloged, 1);
    ingestor.close();

    let (second, _ingestor) = ingest(&source, &archive).await;
    assert_eq!(second.discovered, 1);
    assert_eq!(second.skipped, 1);
}

#[tokio::test]
async fn test_second_ingestor_is_locked_out() {
    let tmp = tempdir().unwrap();
    let archive = tmp.path().join("archive");

    let mut registry = CatalogRegistry::new();
    let first = Ingestor::open(&mut registry, &archive, test_config()).unwrap();
    let second = Ingestor::open(&mut registry, &archive, test_config());
    assert!(matches!(second, Err(IngestError::ArchiveLocked(_))));

    first.close();
    assert!(Ingestor::open(&mut registry, &archive, test_config()).is_ok());
}

#[tokio::test]
async fn test_missing_source_aborts_run() {
    let tmp = tempdir().unwrap();
    let mut registry = CatalogRegistry::new();
    let ingestor = Ingestor::open(&mut registry, &tmp.path().join("archive"), test_config()).unwrap();

    let err = ingestor.run(&tmp.path().join("nowhere")).await.unwrap_err();
    assert!(err.is_run_fatal());
}

#[tokio::test]
async fn test_cancelled_run_commits_nothing_more() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let archive = tmp.path().join("archive");
    put(&source, "a.jpg", &jpeg(40, 40, 1), JAN_2024);
    put(&source, "b.jpg", &jpeg(40, 40, 2), JAN_2024);

    let mut registry = CatalogRegistry::new();
    let ingestor = Ingestor::open(&mut registry, &archive, test_config()).unwrap();
    ingestor.cancel_flag().cancel();

    let report = ingestor.run(&source).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.discovered, 2);
    assert_eq!(report.processed(), 0);
    assert!(entries(&ingestor).is_empty());
}

#[tokio::test]
async fn test_repair_restores_missing_thumbnails() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let archive = tmp.path().join("archive");
    put(&source, "a.png", &png(400, 100, 1), JAN_2024);
    put(&source, "b.jpg", &jpeg(100, 100, 2), JAN_2024);

    let (_, ingestor) = ingest(&source, &archive).await;
    fs::remove_file(archive.join("thumbs/2024/01/a.webp")).unwrap();
    fs::remove_file(archive.join("thumbs/2024/01/a.jpeg")).unwrap();

    let report = ingestor.repair_thumbnails().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.repaired, 1);
    assert_eq!(report.failed, 0);
    assert!(archive.join("thumbs/2024/01/a.webp").exists());
    assert!(archive.join("thumbs/2024/01/a.jpeg").exists());

    let again = ingestor.repair_thumbnails().await.unwrap();
    assert_eq!(again.checked, 0);
}

#[tokio::test]
async fn test_repair_fills_null_dimensions() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let archive = tmp.path().join("archive");
    put(&source, "a.png", &png(300, 150, 1), JAN_2024);

    let (_, ingestor) = ingest(&source, &archive).await;
    let db = rusqlite::Connection::open(archive.join(".meta/gallery.db")).unwrap();
    db.execute("UPDATE images SET thumbWidth = NULL, thumbHeight = NULL", [])
        .unwrap();
    assert!(entries(&ingestor)[0].thumb.is_none());

    let report = ingestor.repair_thumbnails().await.unwrap();
    assert_eq!(report.repaired, 1);
    let entry = &entries(&ingestor)[0];
    assert_eq!(entry.thumb.map(|t| (t.width, t.height)), Some((200, 100)));
}

#[tokio::test]
async fn test_failed_thumbnail_write_rolls_back_copy() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let archive = tmp.path().join("archive");
    put(&source, "a.jpg", &jpeg(80, 60, 1), JAN_2024);
    put(&source, "b.jpg", &jpeg_with_capture_date(80, 60, 2, "2023:05:01 09:15:00"), JAN_2024);
    // A plain file where the month's thumbnail directory should go
    fs::create_dir_all(archive.join("thumbs/2024")).unwrap();
    fs::write(archive.join("thumbs/2024/01"), b"in the way").unwrap();

    let (report, ingestor) = ingest(&source, &archive).await;
    assert_eq!(report.cataloged, 1);
    assert_eq!(report.failed, 1);
    assert!(report.failures[0].path.ends_with("a.jpg"));

    assert!(!archive.join("2024/01/a.jpg").exists());
    let dests: Vec<String> = entries(&ingestor).into_iter().map(|e| e.dest_path).collect();
    assert_eq!(dests, vec!["2023/05/b.jpg"]);
    assert_eq!(
        archive_files(&archive),
        vec![
            "2023/05/b.jpg",
            "thumbs/2023/05/b.jpeg",
            "thumbs/2023/05/b.webp",
            "thumbs/2024/01",
        ]
    );
}

#[tokio::test]
async fn test_failed_insert_rolls_back_copy_and_thumbnails() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let archive = tmp.path().join("archive");
    put(&source, "a.jpg", &jpeg(80, 60, 1), JAN_2024);

    let mut registry = CatalogRegistry::new();
    let ingestor = Ingestor::open(&mut registry, &archive, test_config()).unwrap();
    // A row that claims the destination without any file on disk
    let squatter = photo_archive::CatalogEntry::new(
        "f".repeat(64),
        "/elsewhere/a.jpg".to_string(),
        chrono::DateTime::parse_from_rfc3339("2024-01-15T12:00:00+00:00").unwrap(),
        "2024/01/a.jpg".to_string(),
        None,
    );
    ingestor.catalog().lock().unwrap().insert(&squatter).unwrap();

    let report = ingestor.run(&source).await.unwrap();
    assert_eq!(report.cataloged, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures.len(), 1);

    assert!(!archive.join("2024/01/a.jpg").exists());
    assert!(!archive.join("thumbs/2024/01/a.webp").exists());
    assert!(!archive.join("thumbs/2024/01/a.jpeg").exists());
    assert_eq!(entries(&ingestor), vec![squatter]);
}

#[tokio::test]
async fn test_copy_of_failed_file_is_not_reported_as_skipped() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let archive = tmp.path().join("archive");
    let garbage = b"\xff\xd8\xff not really a jpeg";
    put(&source, "a.jpg", garbage, JAN_2024);
    put(&source, "copy/a.jpg", garbage, JAN_2024);

    let (report, ingestor) = ingest(&source, &archive).await;
    assert_eq!(report.skipped, 0);
    assert_eq!(report.failed, 2);
    assert!(report.failures[1].path.ends_with("copy/a.jpg"));
    assert!(report.failures[1].message.contains("which failed"));
    assert!(entries(&ingestor).is_empty());
}

#[tokio::test]
async fn test_site_builder_query_reads_catalog() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let archive = tmp.path().join("archive");
    put(&source, "a.jpg", &jpeg(400, 300, 1), JAN_2024);

    let (report, _ingestor) = ingest(&source, &archive).await;
    assert_eq!(report.cataloged, 1);

    let db = rusqlite::Connection::open(archive.join(".meta/gallery.db")).unwrap();
    let row: (String, i32, u32, String, u32, u32) = db
        .query_row(
            "SELECT destPath, year, month, captureDate, thumbWidth, thumbHeight
             FROM images ORDER BY captureDate DESC",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
        )
        .unwrap();
    assert_eq!(
        row,
        (
            "2024/01/a.jpg".to_string(),
            2024,
            1,
            "2024-01-15T12:00:00+00:00".to_string(),
            200,
            150
        )
    );
}
