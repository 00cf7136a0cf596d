mod common;

use std::{
    convert::Infallible,
    io::{self, Cursor, Read, Seek, SeekFrom},
};

use common::{gzip, noise, sha_lalal, tar, FailAfter, Item, OneByteReadWrapper, MTIME};
use rc_archive::{ArchiveReader, EntryKind, EntryMetadata, Error, ErrorKind, ReaderOptions};

fn read_all<R>(reader: &mut ArchiveReader<R>, chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        match reader.read_data(&mut buf) {
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(Error::EndOfArchive) => break,
            Err(e) => panic!("read_data failed: {e}"),
        }
    }
    out
}

fn collect<R>(reader: &mut ArchiveReader<R>, chunk: usize) -> Vec<(EntryMetadata, Vec<u8>)> {
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().unwrap() {
        let md = entry.metadata();
        let data = read_all(reader, chunk);
        entries.push((md, data));
    }
    entries
}

#[test_log::test]
fn single_entry() {
    let mut reader = ArchiveReader::new(Cursor::new(sha_lalal())).unwrap();

    let entry = reader.next_header().unwrap();
    assert_eq!(entry.path(), "a");

    let mut b = [0u8; 512];
    let n = reader.read_data(&mut b).unwrap();
    assert_eq!(n, 14);
    assert_eq!(&b[..n], b"Sha lalal lal\n");

    let err = reader.next_header().unwrap_err();
    assert!(err.is_end_of_archive(), "expected end of archive, got {err}");

    reader.close().unwrap();
    reader.free().unwrap();
}

#[test_log::test]
fn end_of_archive_is_sticky() {
    let mut reader = ArchiveReader::new(Cursor::new(sha_lalal())).unwrap();
    assert!(reader.next_entry().unwrap().is_some());
    for _ in 0..3 {
        let err = reader.next_header().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EndOfArchive);
    }
    assert!(reader.next_entry().unwrap().is_none());
}

#[test_log::test]
fn end_of_entry() {
    let mut reader = ArchiveReader::new(Cursor::new(sha_lalal())).unwrap();
    reader.next_header().unwrap();
    assert_eq!(read_all(&mut reader, 512), b"Sha lalal lal\n");

    let mut b = [0u8; 16];
    let err = reader.read_data(&mut b).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EndOfArchive);
    assert_eq!(reader.read(&mut b).unwrap(), 0, "io::Read reports end as Ok(0)");
    assert_eq!(reader.read_data(&mut []).unwrap(), 0);
}

#[test_log::test]
fn counts_every_member() {
    let names: Vec<String> = (0..25).map(|i| format!("dir/file-{i:02}.txt")).collect();
    let items: Vec<Item<'_>> = names
        .iter()
        .map(|name| Item::File(name, name.as_bytes()))
        .collect();
    let bytes = tar(&items);

    let mut reader = ArchiveReader::new(Cursor::new(bytes)).unwrap();
    let entries = collect(&mut reader, 4096);
    assert_eq!(entries.len(), names.len());
    for ((md, data), name) in entries.iter().zip(&names) {
        assert_eq!(&md.path, name);
        assert_eq!(data, name.as_bytes());
    }
}

#[test_log::test]
fn buffer_size_does_not_change_contents() {
    let big = noise(200 * 1024, 7);
    let small = b"tiny".to_vec();
    let bytes = gzip(&tar(&[
        Item::File("big.bin", &big),
        Item::File("small.txt", &small),
        Item::File("empty", b""),
    ]));

    let mut whole = ArchiveReader::new(Cursor::new(bytes.clone())).unwrap();
    let whole = collect(&mut whole, 1024 * 1024);

    let mut bytewise = ReaderOptions::new()
        .buffer_size(1)
        .open(OneByteReadWrapper(Cursor::new(bytes)))
        .unwrap();
    let bytewise = collect(&mut bytewise, 1);

    assert_eq!(whole.len(), 3);
    assert_eq!(whole, bytewise);
    assert_eq!(whole[0].1, big);
    assert_eq!(whole[1].1, small);
    assert!(whole[2].1.is_empty());
}

#[test_log::test]
fn composes_with_io_utilities() {
    let big = noise(64 * 1024, 3);
    let bytes = tar(&[Item::File("one", &big), Item::File("two", b"second")]);
    let mut reader = ArchiveReader::new(Cursor::new(bytes)).unwrap();

    reader.next_header().unwrap();
    let mut copied = Vec::new();
    let n = io::copy(&mut reader, &mut copied).unwrap();
    assert_eq!(n, big.len() as u64);
    assert_eq!(copied, big);

    reader.next_header().unwrap();
    let mut s = String::new();
    io::BufReader::new(&mut reader).read_to_string(&mut s).unwrap();
    assert_eq!(s, "second");
}

#[test_log::test]
fn detects_gzip_filter() {
    let bytes = gzip(&sha_lalal());
    let mut reader = ArchiveReader::new(Cursor::new(bytes)).unwrap();

    assert_eq!(reader.next_header().unwrap().path(), "a");
    assert_eq!(read_all(&mut reader, 512), b"Sha lalal lal\n");

    let filters = reader.filter_names();
    assert!(filters.iter().any(|f| f == "gzip"), "filters: {filters:?}");
    assert_eq!(reader.filter_count(), filters.len());
    let format = reader.format_name().unwrap_or_default();
    assert!(format.to_lowercase().contains("tar"), "format: {format}");

    let plain = ArchiveReader::new(Cursor::new(sha_lalal())).unwrap();
    assert!(!plain.filter_names().iter().any(|f| f == "gzip"));
}

#[test_log::test]
fn entry_metadata() {
    let bytes = tar(&[
        Item::Dir("dir/"),
        Item::File("dir/hello.txt", b"hello"),
        Item::Symlink("dir/link", "hello.txt"),
    ]);
    let mut reader = ArchiveReader::new(Cursor::new(bytes)).unwrap();
    let entries = collect(&mut reader, 512);
    assert_eq!(entries.len(), 3);

    let (dir, _) = &entries[0];
    assert_eq!(dir.path.trim_end_matches('/'), "dir");
    assert_eq!(dir.kind, EntryKind::Directory);
    assert_eq!(dir.name(), "dir");
    assert!(dir.is_dir());
    assert!(dir.mode.is_dir());
    assert_eq!(dir.mode.permissions(), 0o755);

    let (file, data) = &entries[1];
    assert_eq!(file.path, "dir/hello.txt");
    assert_eq!(file.kind, EntryKind::RegularFile);
    assert_eq!(file.name(), "hello.txt");
    assert!(!file.is_dir());
    assert_eq!(file.size, Some(5));
    assert_eq!(file.mode.permissions(), 0o644);
    assert_eq!(file.mtime, Some((MTIME as i64, 0)));
    assert_eq!(file.modified().timestamp(), MTIME as i64);
    assert_eq!(data, b"hello");

    let (link, data) = &entries[2];
    assert_eq!(link.path, "dir/link");
    assert_eq!(link.kind, EntryKind::Symlink);
    assert!(data.is_empty());
}

#[test_log::test]
fn entry_view_accessors() {
    let mut reader = ArchiveReader::new(Cursor::new(sha_lalal())).unwrap();
    let entry = reader.next_header().unwrap();
    assert_eq!(entry.path_bytes(), b"a");
    assert_eq!(entry.name(), "a");
    assert!(!entry.is_dir());
    assert_eq!(entry.size(), Some(14));
    assert_eq!(entry.kind(), EntryKind::RegularFile);
    assert_eq!(entry.permissions(), 0o644);
    assert_eq!(entry.unix_mode().0 & 0o170000, 0o100000);
    assert_eq!(entry.modified().timestamp(), MTIME as i64);
    let md = entry.metadata();
    assert_eq!(md.path, "a");
    assert!(format!("{entry:?}").contains("RegularFile"));
}

#[test_log::test]
fn skip_data() {
    let big = noise(10_000, 1);
    let bytes = tar(&[Item::File("skipped", &big), Item::File("kept", b"kept")]);
    let mut reader = ArchiveReader::new(Cursor::new(bytes)).unwrap();

    assert_eq!(reader.next_header().unwrap().path(), "skipped");
    reader.skip_data().unwrap();
    assert_eq!(reader.next_header().unwrap().path(), "kept");
    assert_eq!(read_all(&mut reader, 3), b"kept");
}

#[test_log::test]
fn streaming_source() {
    let data = noise(50_000, 11);
    let bytes = gzip(&tar(&[Item::File("x", &data), Item::File("y", b"why")]));

    // `Chain` is not `Seek`, so no seek callback gets installed
    let source = io::Read::chain(Cursor::new(bytes), io::empty());
    let mut reader = ArchiveReader::new_streaming(source).unwrap();
    let entries = collect(&mut reader, 777);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].1, data);
    assert_eq!(entries[1].1, b"why");
}

#[test_log::test]
fn empty_stream_has_no_entries() {
    let mut reader = ArchiveReader::new(Cursor::new(Vec::new())).unwrap();
    assert!(reader.next_entry().unwrap().is_none());
}

#[test_log::test]
fn not_an_archive() {
    let garbage = vec![0xa5u8; 4096];
    let err = match ArchiveReader::new(Cursor::new(garbage)) {
        Err(e) => e,
        Ok(mut reader) => reader
            .next_header()
            .map(|entry| entry.metadata())
            .expect_err("garbage should not parse"),
    };
    assert_eq!(err.kind(), ErrorKind::Fatal, "got {err}");
    assert!(err.detail().is_some());
}

#[test_log::test]
fn source_errors_reach_the_caller() {
    let data = noise(512 * 1024, 5);
    let source = FailAfter {
        data: tar(&[Item::File("doomed", &data)]),
        pos: 0,
        limit: 200 * 1024,
    };

    let first_error = move || -> Result<Infallible, Error> {
        let mut reader = ArchiveReader::new_streaming(source)?;
        reader.next_header()?;
        let mut buf = vec![0u8; 8192];
        loop {
            reader.read_data(&mut buf)?;
        }
    };

    let err = first_error().unwrap_err();
    assert!(
        matches!(err.kind(), ErrorKind::Fatal | ErrorKind::Failed),
        "got {err}"
    );
    assert!(
        err.detail().unwrap_or_default().contains("disk on fire"),
        "got {err}"
    );
}

#[test_log::test]
fn source_errors_while_opening_reach_the_caller() {
    let source = FailAfter {
        data: sha_lalal(),
        pos: 0,
        limit: 0,
    };

    // the engine reads ahead while opening, but may defer the failure
    let err = match ArchiveReader::new_streaming(source) {
        Err(e) => e,
        Ok(mut reader) => reader
            .next_header()
            .map(|entry| entry.metadata())
            .expect_err("nothing could be read"),
    };
    assert!(!err.is_end_of_archive(), "got {err}");
    assert!(
        err.detail().unwrap_or_default().contains("disk on fire"),
        "got {err}"
    );
}

#[test_log::test]
fn two_readers_do_not_interfere() {
    let bytes_a = tar(&[Item::File("a", &noise(30_000, 1)), Item::File("b", b"bee")]);
    let bytes_b = gzip(&tar(&[
        Item::File("c", &noise(30_000, 2)),
        Item::File("d", b"dee"),
    ]));

    let expected_a = collect(&mut ArchiveReader::new(Cursor::new(bytes_a.clone())).unwrap(), 4096);
    let expected_b = collect(&mut ArchiveReader::new(Cursor::new(bytes_b.clone())).unwrap(), 4096);

    // interleaved on one thread, with small buffers so both keep calling back
    let options = ReaderOptions::new().buffer_size(64);
    let mut ra = options.open(Cursor::new(bytes_a.clone())).unwrap();
    let mut rb = options.open(Cursor::new(bytes_b.clone())).unwrap();
    assert_ne!(ra.token(), rb.token());

    let mut got_a: Vec<(String, Vec<u8>)> = Vec::new();
    let mut got_b: Vec<(String, Vec<u8>)> = Vec::new();
    let mut buf = [0u8; 100];
    for _ in 0..2 {
        got_a.push((ra.next_header().unwrap().path().into_owned(), Vec::new()));
        got_b.push((rb.next_header().unwrap().path().into_owned(), Vec::new()));
        let (mut done_a, mut done_b) = (false, false);
        while !(done_a && done_b) {
            if !done_a {
                match ra.read_data(&mut buf) {
                    Ok(n) => got_a.last_mut().unwrap().1.extend_from_slice(&buf[..n]),
                    Err(e) if e.is_end_of_archive() => done_a = true,
                    Err(e) => panic!("{e}"),
                }
            }
            if !done_b {
                match rb.read_data(&mut buf) {
                    Ok(n) => got_b.last_mut().unwrap().1.extend_from_slice(&buf[..n]),
                    Err(e) if e.is_end_of_archive() => done_b = true,
                    Err(e) => panic!("{e}"),
                }
            }
        }
    }
    let strip = |v: &[(EntryMetadata, Vec<u8>)]| -> Vec<(String, Vec<u8>)> {
        v.iter().map(|(md, d)| (md.path.clone(), d.clone())).collect()
    };
    assert_eq!(got_a, strip(&expected_a));
    assert_eq!(got_b, strip(&expected_b));

    // and on separate threads
    let handles: Vec<_> = [bytes_a, bytes_b]
        .into_iter()
        .map(|bytes| {
            std::thread::spawn(move || {
                let mut reader = ReaderOptions::new()
                    .buffer_size(17)
                    .open(Cursor::new(bytes))
                    .unwrap();
                let entries = collect(&mut reader, 31);
                reader.free().unwrap();
                entries
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results[0], expected_a);
    assert_eq!(results[1], expected_b);
}

#[test_log::test]
fn seek_bookkeeping() {
    let mut reader = ArchiveReader::new(Cursor::new(sha_lalal())).unwrap();
    assert_eq!(reader.offset(), 0);

    reader.next_header().unwrap();
    let mut b = [0u8; 4];
    assert_eq!(reader.read_data(&mut b).unwrap(), 4);
    assert_eq!(reader.offset(), 4);

    assert_eq!(reader.seek(SeekFrom::Current(6)).unwrap(), 10);
    assert_eq!(reader.seek_whence(-2, 1).unwrap(), 8);
    assert_eq!(reader.seek_whence(3, 0).unwrap(), 3);
    assert_eq!(reader.offset(), 3);

    let size = reader.size();
    assert!(size > 0, "size should count consumed bytes, got {size}");
    assert_eq!(reader.seek(SeekFrom::End(0)).unwrap(), size as u64);
    assert_eq!(reader.seek_whence(-1, 2).unwrap(), size as u64 - 1);

    // reads advance from wherever the bookkeeping says
    reader.seek(SeekFrom::Start(100)).unwrap();
    assert_eq!(reader.read_data(&mut b).unwrap(), 4);
    assert_eq!(reader.offset(), 104);
    assert_eq!(Seek::stream_position(&mut reader).unwrap(), 104);
}

#[test_log::test]
fn seek_rejects_invalid_whence() {
    let mut reader = ArchiveReader::new(Cursor::new(sha_lalal())).unwrap();
    reader.seek(SeekFrom::Start(42)).unwrap();

    for whence in [3, -1, 100, i32::MIN] {
        let err = reader.seek_whence(0, whence).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SeekInvalid);
        assert_eq!(reader.offset(), 42);
    }
}

#[test_log::test]
fn seek_rejects_negative_positions() {
    let mut reader = ArchiveReader::new(Cursor::new(sha_lalal())).unwrap();
    reader.seek(SeekFrom::Start(5)).unwrap();

    let err = reader.seek(SeekFrom::Current(-6)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SeekInvalid);
    assert_eq!(reader.offset(), 5);

    let err = reader.seek_whence(-1, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SeekInvalid);
    assert_eq!(reader.offset(), 5);

    let end = reader.size();
    let err = reader.seek(SeekFrom::End(-end - 1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SeekInvalid);
    assert_eq!(reader.offset(), 5);

    let err = Seek::seek(&mut reader, SeekFrom::Current(-100)).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::Other);
    assert_eq!(reader.offset(), 5);

    assert_eq!(reader.seek(SeekFrom::Current(-5)).unwrap(), 0);
}
