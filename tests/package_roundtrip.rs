//! whole-package write/open tests

use std::fs;

use novuspack::format::{HeaderFlags, PathMetadataEntry, Signature, SignatureType};
use novuspack::tags::TagValueType;
use novuspack::{import_dir, Cancellation, Config, ErrorKind, Package, TEMP_PREFIX};
use tempfile::tempdir;

fn leftover_temps(dir: &std::path::Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with(TEMP_PREFIX)
        })
        .count()
}

#[test]
fn test_pack_directory_and_reopen() {
    let src = tempdir().unwrap();
    fs::create_dir_all(src.path().join("assets/img")).unwrap();
    fs::write(src.path().join("assets/img/logo.png"), vec![0x89u8; 2048]).unwrap();
    fs::write(src.path().join("assets/style.css"), b"body{}").unwrap();
    fs::write(src.path().join("main.lua"), b"print('hi')").unwrap();

    let out = tempdir().unwrap();
    let target = out.path().join("game.nvpk");
    let cancel = Cancellation::new();

    let mut pkg = Package::new();
    import_dir(&mut pkg, src.path(), &cancel).unwrap();
    pkg.path_metadata_mut()
        .get_mut("/assets/")
        .unwrap()
        .properties
        .add("category", "asset", TagValueType::String)
        .unwrap();
    pkg.safe_write(&target, false, &cancel).unwrap();
    assert_eq!(leftover_temps(out.path()), 0);

    let opened = Package::open(&target, &cancel).unwrap();
    assert_eq!(opened.file_count(), 3);
    assert_eq!(opened.path_metadata().len(), 5);
    assert_eq!(
        opened.read_file("/assets/style.css", &cancel).unwrap(),
        b"body{}"
    );

    let tags = opened.file_tags("/assets/img/logo.png").unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].value.as_str(), Some("asset"));
    assert!(opened.file_tags("/main.lua").unwrap().is_empty());

    assert_eq!(opened.find("/assets/**/*").unwrap().len(), 2);
    assert!(opened
        .header()
        .flags
        .contains(HeaderFlags::HAS_SPECIAL_METADATA));
}

#[test]
fn test_edit_in_place() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("edit.nvpk");
    let cancel = Cancellation::new();

    let mut pkg = Package::new();
    pkg.add_file("a.txt", b"first".to_vec()).unwrap();
    pkg.add_file("b.txt", b"second".to_vec()).unwrap();
    pkg.safe_write(&target, false, &cancel).unwrap();

    let mut pkg = Package::open(&target, &cancel).unwrap();
    pkg.remove_file("/a.txt").unwrap();
    pkg.add_file("c.txt", b"third".to_vec()).unwrap();
    pkg.set_comment(Some("edited".into())).unwrap();
    let sig = Signature::new(SignatureType::X509, vec![0xAB; 64])
        .with_comment("ci")
        .unwrap();
    pkg.append_signature(sig).unwrap();
    pkg.write(&cancel).unwrap();
    assert_eq!(leftover_temps(dir.path()), 0);

    let opened = Package::open(&target, &cancel).unwrap();
    assert!(opened.file_by_path("/a.txt").is_none());
    assert_eq!(opened.read_file("/b.txt", &cancel).unwrap(), b"second");
    assert_eq!(opened.read_file("/c.txt", &cancel).unwrap(), b"third");
    assert_eq!(opened.comment(), Some("edited"));
    assert_eq!(opened.signatures()[0].comment, "ci");
    assert_eq!(opened.signatures()[0].data, vec![0xAB; 64]);
}

#[test]
fn test_unknown_flag_bits_survive_rewrite() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("flags.nvpk");
    let cancel = Cancellation::new();

    let mut pkg = Package::new();
    pkg.add_file("a", b"x".to_vec()).unwrap();
    pkg.safe_write(&target, false, &cancel).unwrap();

    // flags live at bytes 8..12 of the header
    let mut bytes = fs::read(&target).unwrap();
    let flags = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) | (1 << 20);
    bytes[8..12].copy_from_slice(&flags.to_le_bytes());
    fs::write(&target, &bytes).unwrap();

    let mut pkg = Package::open(&target, &cancel).unwrap();
    pkg.add_file("b", b"y".to_vec()).unwrap();
    pkg.write(&cancel).unwrap();

    let opened = Package::open(&target, &cancel).unwrap();
    assert!(opened.header().flags.contains(1 << 20));
    assert_eq!(opened.file_count(), 2);
}

#[test]
fn test_cancelled_write_leaves_package_untouched() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("stable.nvpk");
    let cancel = Cancellation::new();

    let mut pkg = Package::new();
    pkg.add_file("a", b"original".to_vec()).unwrap();
    pkg.safe_write(&target, false, &cancel).unwrap();
    let before = fs::read(&target).unwrap();

    let mut pkg = Package::open(&target, &cancel).unwrap();
    pkg.add_file("b", vec![1u8; 4096]).unwrap();
    let stopped = Cancellation::new();
    stopped.cancel();
    let err = pkg.write(&stopped).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Context);

    assert_eq!(fs::read(&target).unwrap(), before);
    assert_eq!(leftover_temps(dir.path()), 0);
}

#[test]
fn test_streamed_write_matches_buffered() {
    let dir = tempdir().unwrap();
    let cancel = Cancellation::new();

    let build = || {
        let mut pkg = Package::new();
        pkg.set_app_id(5);
        pkg.add_file("big.bin", vec![3u8; 64 * 1024]).unwrap();
        pkg
    };

    let mut streamed_config = Config::default();
    streamed_config.write.stream_threshold = 0;
    streamed_config.write.sync = false;

    let streamed = dir.path().join("streamed.nvpk");
    let report = build()
        .write_with(&streamed, &streamed_config, false, &cancel)
        .unwrap();
    assert!(report.streamed);

    let buffered = dir.path().join("buffered.nvpk");
    let report = build()
        .write_with(&buffered, &Config::default(), false, &cancel)
        .unwrap();
    assert!(!report.streamed);

    let a = Package::open(&streamed, &cancel).unwrap();
    let b = Package::open(&buffered, &cancel).unwrap();
    assert_eq!(
        a.read_file("/big.bin", &cancel).unwrap(),
        b.read_file("/big.bin", &cancel).unwrap()
    );
    assert_eq!(fs::metadata(&streamed).unwrap().len(), fs::metadata(&buffered).unwrap().len());
}

#[test]
fn test_truncated_package_is_corruption() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("cut.nvpk");
    let cancel = Cancellation::new();

    let mut pkg = Package::new();
    pkg.add_file("a.txt", b"some content".to_vec()).unwrap();
    pkg.path_metadata_mut()
        .insert(PathMetadataEntry::file("a.txt").unwrap())
        .unwrap();
    pkg.safe_write(&target, false, &cancel).unwrap();

    let bytes = fs::read(&target).unwrap();
    for cut in [10, 112, bytes.len() / 2, bytes.len() - 1] {
        fs::write(&target, &bytes[..cut]).unwrap();
        let err = Package::open(&target, &cancel).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption, "cut at {}", cut);
    }
}

fn replace_all(bytes: &mut [u8], from: &[u8], to: &[u8]) -> usize {
    assert_eq!(from.len(), to.len());
    let mut count = 0;
    let mut at = 0;
    while let Some(pos) = bytes[at..].windows(from.len()).position(|w| w == from) {
        let start = at + pos;
        bytes[start..start + to.len()].copy_from_slice(to);
        at = start + to.len();
        count += 1;
    }
    count
}

#[test]
fn test_file_id_at_limit() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("ids.nvpk");
    let cancel = Cancellation::new();

    let mut pkg = Package::new();
    pkg.add_file("a.txt", b"x".to_vec()).unwrap();
    pkg.file_by_path_mut("/a.txt").unwrap().file_id = u64::MAX - 1;
    pkg.safe_write(&target, false, &cancel).unwrap();

    // the last usable id is taken, so nothing more can be added
    let mut pkg = Package::open(&target, &cancel).unwrap();
    let err = pkg.add_file("b.txt", b"y".to_vec()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.context().unwrap().field, "FileID");

    // an id of u64::MAX in the entry and its index slot
    let mut bytes = fs::read(&target).unwrap();
    let hits = replace_all(
        &mut bytes,
        &(u64::MAX - 1).to_le_bytes(),
        &u64::MAX.to_le_bytes(),
    );
    assert_eq!(hits, 2);
    fs::write(&target, &bytes).unwrap();

    let err = Package::open(&target, &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corruption);
    assert_eq!(err.context().unwrap().field, "FileID");
}

#[test]
fn test_path_shared_by_two_entries_is_corruption() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("dup.nvpk");
    let cancel = Cancellation::new();

    let mut pkg = Package::new();
    pkg.add_file("first.txt", b"1".to_vec()).unwrap();
    pkg.add_file("other.txt", b"2".to_vec()).unwrap();
    pkg.safe_write(&target, false, &cancel).unwrap();

    let mut bytes = fs::read(&target).unwrap();
    assert_eq!(replace_all(&mut bytes, b"/other.txt", b"/first.txt"), 1);
    fs::write(&target, &bytes).unwrap();

    let err = Package::open(&target, &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corruption);
    assert_eq!(err.context().unwrap().field, "Path");
}
