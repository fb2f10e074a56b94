use ntk_root::objects::{BranchSpec, LeafSpec, TreeSpec, write_ttree};
use ntk_root::{
    CompressionSetting, EntryCursor, LeafType, RootError, RootFile, RootWriter, Shape, TreeWriter,
    Values, count_entries_fast, count_entries_slow,
};
use std::path::PathBuf;

fn tmp_file(label: &str) -> PathBuf {
    let nanos =
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    std::env::temp_dir().join(format!("ntk-count-{}-{}-{}.root", label, std::process::id(), nanos))
}

/// Store a TTree record built by hand, so its metadata can disagree with
/// what is on disk.
fn put_tree(file: &mut RootWriter, spec: &TreeSpec) {
    let key = file.new_key("TTree", &spec.name, &spec.title);
    let payload = write_ttree(spec, key.key_len as usize);
    file.write_object(key, &payload).unwrap();
}

fn scalar_branch(name: &str, entries: u64) -> BranchSpec {
    BranchSpec {
        name: name.into(),
        title: format!("{}/I", name),
        leaf: LeafSpec {
            name: name.into(),
            leaf_type: LeafType::I32,
            len: 1,
            count_leaf: None,
            is_range: false,
            maximum: 0,
        },
        entry_offset_len: 0,
        entries,
        tot_bytes: 0,
        zip_bytes: 0,
        basket_bytes: Vec::new(),
        basket_entry: vec![0],
        basket_seek: Vec::new(),
    }
}

#[test]
fn fast_and_slow_agree() {
    let path = tmp_file("agree");
    let mut file = RootWriter::create(&path, CompressionSetting::default()).unwrap();
    TreeWriter::new("AnalysisTree", "")
        .with_basket_entries(7)
        .column("n", Shape::Scalar, Values::U8((0..100).map(|i| (i % 5) as u8).collect()))
        .column("w", Shape::Scalar, Values::F32(vec![1.0; 100]))
        .write(&mut file)
        .unwrap();
    file.close().unwrap();

    let f = RootFile::open(&path).unwrap();
    assert_eq!(count_entries_fast(&f, "AnalysisTree").unwrap(), 100);
    assert_eq!(count_entries_slow(&f, "AnalysisTree").unwrap(), 100);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn cursor_visits_entries_in_order() {
    let path = tmp_file("cursor");
    let mut file = RootWriter::create(&path, CompressionSetting::default()).unwrap();
    TreeWriter::new("AnalysisTree", "")
        .with_basket_entries(3)
        .column("id", Shape::Scalar, Values::I64((10..20).collect()))
        .column("n", Shape::Scalar, Values::I32(vec![1, 0, 2, 1, 0, 0, 1, 3, 0, 1]))
        .column("e", Shape::Counted("n".into()), Values::F64((0..9).map(|i| i as f64).collect()))
        .write(&mut file)
        .unwrap();
    file.close().unwrap();

    let f = RootFile::open(&path).unwrap();
    let tree = f.get_tree("AnalysisTree").unwrap();
    let mut cursor = EntryCursor::new(f.file_data(), &tree).unwrap();
    let mut ids = Vec::new();
    let mut widths = Vec::new();
    while cursor.advance().unwrap() {
        let id = cursor.value("id").unwrap();
        ids.push(i64::from_be_bytes(id.try_into().unwrap()));
        widths.push(cursor.value("e").unwrap().len() / 8);
    }
    assert_eq!(ids, (10..20).collect::<Vec<_>>());
    assert_eq!(widths, vec![1, 0, 2, 1, 0, 0, 1, 3, 0, 1]);
    assert_eq!(cursor.position(), 10);
    assert!(!cursor.advance().unwrap());
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn entries_without_baskets_are_an_error() {
    let path = tmp_file("no-baskets");
    let mut file = RootWriter::create(&path, CompressionSetting::default()).unwrap();
    put_tree(
        &mut file,
        &TreeSpec {
            name: "AnalysisTree".into(),
            title: String::new(),
            entries: 10,
            tot_bytes: 0,
            zip_bytes: 0,
            compress: 101,
            branches: vec![scalar_branch("x", 10)],
        },
    );
    file.close().unwrap();

    let f = RootFile::open(&path).unwrap();
    assert_eq!(count_entries_fast(&f, "AnalysisTree").unwrap(), 10);
    assert!(matches!(count_entries_slow(&f, "AnalysisTree"), Err(RootError::Unsupported(_))));
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn cached_count_disagreeing_with_baskets_is_an_error() {
    let path = tmp_file("mismatch");
    let mut file = RootWriter::create(&path, CompressionSetting::default()).unwrap();
    TreeWriter::new("Good", "")
        .with_basket_entries(4)
        .column("x", Shape::Scalar, Values::I32((0..10).collect()))
        .write(&mut file)
        .unwrap();
    file.close().unwrap();

    // Rewriting the same path reproduces the same basket offsets, so the
    // baskets of "Good" can be reused under a tree whose fEntries is off by two.
    let baskets = {
        let f = RootFile::open(&path).unwrap();
        f.get_tree("Good").unwrap().branches[0].clone()
    };
    let mut branch = scalar_branch("x", 10);
    branch.basket_bytes = baskets.basket_bytes.clone();
    branch.basket_entry = baskets.basket_entry.clone();
    branch.basket_seek = baskets.basket_seek.clone();

    let mut file = RootWriter::create(&path, CompressionSetting::default()).unwrap();
    TreeWriter::new("Good", "")
        .with_basket_entries(4)
        .column("x", Shape::Scalar, Values::I32((0..10).collect()))
        .write(&mut file)
        .unwrap();
    put_tree(
        &mut file,
        &TreeSpec {
            name: "AnalysisTree".into(),
            title: String::new(),
            entries: 12,
            tot_bytes: 0,
            zip_bytes: 0,
            compress: 101,
            branches: vec![branch],
        },
    );
    file.close().unwrap();

    let f = RootFile::open(&path).unwrap();
    assert_eq!(count_entries_slow(&f, "Good").unwrap(), 10);
    assert_eq!(count_entries_fast(&f, "AnalysisTree").unwrap(), 12);
    assert!(matches!(count_entries_slow(&f, "AnalysisTree"), Err(RootError::EntryMismatch(_))));
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn missing_tree_is_not_found() {
    let path = tmp_file("missing");
    RootWriter::create(&path, CompressionSetting::default()).unwrap().close().unwrap();
    let f = RootFile::open(&path).unwrap();
    assert!(matches!(count_entries_fast(&f, "AnalysisTree"), Err(RootError::TreeNotFound(_))));
    assert!(matches!(count_entries_slow(&f, "AnalysisTree"), Err(RootError::TreeNotFound(_))));
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn garbage_file_does_not_open() {
    let path = tmp_file("garbage");
    std::fs::write(&path, b"this is not a ROOT file").unwrap();
    assert!(matches!(RootFile::open(&path), Err(RootError::BadMagic)));
    std::fs::remove_file(&path).unwrap();
}
