use archive7::{Archive, ArchiveOptions, Comparison, DeleteMode, EntryKind, Error, Query};
use tempfile::tempdir;

const SECRET: [u8; 32] = [0u8; 32];

fn setup(dir: &tempfile::TempDir) -> Archive {
    Archive::setup(&dir.path().join("test.ar7"), &SECRET, ArchiveOptions::default()).unwrap()
}

#[test]
fn fresh_archive_has_a_clean_header() {
    let dir = tempdir().unwrap();
    let ar = setup(&dir);
    let stats = ar.stats();
    assert_eq!(stats.title, "");
    assert_eq!(stats.major, 2);
    assert_eq!(stats.minor, 0);
    assert!(!stats.id.is_nil());
    ar.close().unwrap();
}

#[test]
fn header_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.ar7");
    let options = ArchiveOptions {
        title: "household archive".to_string(),
        ..ArchiveOptions::default()
    };
    let id;
    {
        let ar = Archive::setup(&path, &SECRET, options).unwrap();
        id = ar.stats().id;
        ar.close().unwrap();
    }
    let ar = Archive::open(&path, &SECRET, DeleteMode::Erase).unwrap();
    assert_eq!(ar.stats().id, id);
    assert_eq!(ar.stats().title, "household archive");
    ar.close().unwrap();
}

#[test]
fn small_file_round_trip_with_info() {
    let dir = tempdir().unwrap();
    let mut ar = setup(&dir);
    ar.mkfile("/a.bin", b"hello").unwrap();
    assert_eq!(ar.load("/a.bin").unwrap(), b"hello");
    let info = ar.info("/a.bin").unwrap();
    assert_eq!(info.size, 5);
    assert_eq!(info.length, 5);
    assert_eq!(info.kind, EntryKind::File);
    ar.close().unwrap();
}

#[test]
fn five_megabyte_file_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.ar7");
    let data = vec![0xABu8; 5_000_000];
    {
        let mut ar = Archive::setup(&path, &SECRET, ArchiveOptions::default()).unwrap();
        ar.mkfile("/big.bin", &data).unwrap();
        ar.close().unwrap();
    }
    let mut ar = Archive::open(&path, &SECRET, DeleteMode::Erase).unwrap();
    assert_eq!(ar.load("/big.bin").unwrap(), data);
    assert_eq!(ar.info("/big.bin").unwrap().size, 5_000_000);
    ar.close().unwrap();
}

#[test]
fn rename_in_a_subdirectory() {
    let dir = tempdir().unwrap();
    let mut ar = setup(&dir);
    ar.mkdir("/d").unwrap();
    ar.mkfile("/d/x", b"x").unwrap();
    ar.rename("/d/x", "y").unwrap();
    assert_eq!(ar.load("/d/y").unwrap(), b"x");
    assert!(matches!(ar.info("/d/x"), Err(Error::FileNotFound)));
    ar.close().unwrap();
}

#[test]
fn erase_frees_the_name() {
    let dir = tempdir().unwrap();
    let mut ar = setup(&dir);
    ar.mkfile("/g", b"1").unwrap();
    ar.remove_with_mode("/g", DeleteMode::Erase).unwrap();
    ar.mkfile("/g", b"2").unwrap();
    assert_eq!(ar.load("/g").unwrap(), b"2");
    ar.close().unwrap();
}

#[test]
fn overwrite_then_reload() {
    let dir = tempdir().unwrap();
    let mut ar = setup(&dir);
    ar.mkfile("/p", b"first contents").unwrap();
    assert_eq!(ar.load("/p").unwrap(), b"first contents");
    ar.save("/p", b"second").unwrap();
    assert_eq!(ar.load("/p").unwrap(), b"second");
    assert_eq!(ar.info("/p").unwrap().size, 6);
    ar.close().unwrap();
}

#[test]
fn mkdir_failure_modes() {
    let dir = tempdir().unwrap();
    let mut ar = setup(&dir);
    ar.mkdir("/d").unwrap();
    assert!(matches!(ar.mkdir("/d"), Err(Error::DuplicateKey(_))));
    assert!(matches!(ar.mkdir("/missing/e"), Err(Error::ParentNotFound)));
    ar.close().unwrap();
}

#[test]
fn move_between_directories() {
    let dir = tempdir().unwrap();
    let mut ar = setup(&dir);
    ar.mkdir("/src").unwrap();
    ar.mkdir("/dst").unwrap();
    ar.mkfile("/src/f", b"payload").unwrap();
    ar.move_entry("/src/f", "/dst").unwrap();
    assert_eq!(ar.load("/dst/f").unwrap(), b"payload");
    assert!(matches!(ar.load("/src/f"), Err(Error::FileNotFound)));
    ar.close().unwrap();
}

#[test]
fn links_load_their_target() {
    let dir = tempdir().unwrap();
    let mut ar = setup(&dir);
    ar.mkfile("/target.bin", b"via link").unwrap();
    ar.mklink("/alias", "/target.bin").unwrap();
    assert_eq!(ar.load("/alias").unwrap(), b"via link");
    assert_eq!(ar.info("/alias").unwrap().kind, EntryKind::Link);

    assert!(matches!(
        ar.mklink("/alias2", "/alias"),
        Err(Error::LinkToLink)
    ));
    ar.close().unwrap();
}

#[test]
fn walk_lists_the_whole_hierarchy() {
    let dir = tempdir().unwrap();
    let mut ar = setup(&dir);
    ar.mkdir("/docs").unwrap();
    ar.mkfile("/docs/a", b"a").unwrap();
    ar.mkfile("/docs/b", b"b").unwrap();
    ar.mkfile("/top", b"t").unwrap();

    let paths: Vec<String> = ar
        .walk("/")
        .unwrap()
        .into_iter()
        .map(|(_, path)| path)
        .collect();
    assert_eq!(paths, vec!["/docs", "/docs/a", "/docs/b", "/top"]);
    ar.close().unwrap();
}

#[test]
fn search_by_glob_and_flags() {
    let dir = tempdir().unwrap();
    let mut ar = setup(&dir);
    ar.mkfile("/report.bin", b"1").unwrap();
    ar.mkfile("/report.txt", b"2").unwrap();
    ar.mkfile("/notes.bin", b"3").unwrap();
    ar.remove_with_mode("/notes.bin", DeleteMode::Soft).unwrap();

    let bins = ar.search(&Query::new().name("*.bin").unwrap()).unwrap();
    assert_eq!(bins.len(), 2);

    let live_bins = ar
        .search(&Query::new().name("*.bin").unwrap().deleted(false))
        .unwrap();
    assert_eq!(live_bins.len(), 1);
    assert_eq!(live_bins[0].name, "report.bin");

    let recent = ar
        .search(&Query::new().modified(Comparison::Greater, 0))
        .unwrap();
    assert!(recent.len() >= 4);
    ar.close().unwrap();
}

#[test]
fn soft_removed_files_stay_loadable_until_hard() {
    let dir = tempdir().unwrap();
    let mut ar = setup(&dir);
    ar.mkfile("/f", b"data").unwrap();
    ar.remove_with_mode("/f", DeleteMode::Soft).unwrap();
    assert!(ar.info("/f").unwrap().deleted);
    assert_eq!(ar.load("/f").unwrap(), b"data");

    ar.remove_with_mode("/f", DeleteMode::Hard).unwrap();
    let info = ar.info("/f").unwrap();
    assert!(info.deleted);
    assert!(info.stream.is_nil());
    ar.close().unwrap();
}

#[test]
fn wrong_secret_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.ar7");
    Archive::setup(&path, &SECRET, ArchiveOptions::default())
        .unwrap()
        .close()
        .unwrap();
    assert!(matches!(
        Archive::open(&path, &[0xFFu8; 32], DeleteMode::Erase),
        Err(Error::Auth)
    ));
}

#[test]
fn second_process_handle_is_locked_out() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.ar7");
    let ar = Archive::setup(&path, &SECRET, ArchiveOptions::default()).unwrap();
    assert!(matches!(
        Archive::open(&path, &SECRET, DeleteMode::Erase),
        Err(Error::Lock)
    ));
    ar.close().unwrap();
}

#[test]
fn many_files_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.ar7");
    {
        let mut ar = Archive::setup(&path, &SECRET, ArchiveOptions::default()).unwrap();
        ar.mkdir("/n").unwrap();
        for i in 0..64 {
            ar.mkfile(&format!("/n/file-{i:03}"), format!("body {i}").as_bytes())
                .unwrap();
        }
        ar.close().unwrap();
    }
    let mut ar = Archive::open(&path, &SECRET, DeleteMode::Erase).unwrap();
    for i in 0..64 {
        assert_eq!(
            ar.load(&format!("/n/file-{i:03}")).unwrap(),
            format!("body {i}").as_bytes()
        );
    }
    assert_eq!(ar.walk("/n").unwrap().len(), 64);
    ar.close().unwrap();
}

#[cfg(feature = "async")]
mod async_facade {
    use super::*;
    use archive7::AsyncArchive;

    #[tokio::test]
    async fn operations_serialize_through_the_facade() {
        let dir = tempdir().unwrap();
        let ar = AsyncArchive::setup(
            dir.path().join("async.ar7"),
            SECRET,
            ArchiveOptions::default(),
        )
        .await
        .unwrap();

        ar.mkdir("/d").await.unwrap();
        ar.mkfile("/d/x", b"async bytes").await.unwrap();
        assert_eq!(ar.load("/d/x").await.unwrap(), b"async bytes");

        let shared = ar.clone();
        assert_eq!(shared.info("/d/x").await.unwrap().size, 11);
        assert!(shared.close().await.is_err());

        ar.close().await.unwrap();
    }
}
