// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use rand::{rng, Rng, RngCore};
use subdex::Config;

fn write_tempfile(dir: &tempfile::TempDir, name: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, b"irrelevant").unwrap();
    path.to_str().unwrap().to_string()
}

fn hits(results: &[u32], want: usize) {
    assert_eq!(results.len(), want, "got {results:?}");
}

#[test_log::test]
fn e2_substitution_budget() -> subdex::Result<()> {
    let dir = tempfile::tempdir()?;
    let f0 = write_tempfile(&dir, "f0.txt");
    let mut engine = Config::new().open_rw(dir.path().join("db"))?;
    engine.expand("xYz", &f0)?;

    let mut found = Vec::new();
    engine.search(b"abc", |f| found.push(f))?;
    hits(&found, 0);

    found.clear();
    engine.search_approx(1, false, b"xz", |f| found.push(f))?;
    hits(&found, 1);

    found.clear();
    engine.search_approx(1, false, b"xYxz", |f| found.push(f))?;
    hits(&found, 1);

    found.clear();
    engine.search_approx(1, false, b"xYxxz", |f| found.push(f))?;
    hits(&found, 0);

    Ok(())
}

#[test_log::test]
fn e3_multiple_keywords_one_file() -> subdex::Result<()> {
    let dir = tempfile::tempdir()?;
    let f0 = write_tempfile(&dir, "f0.txt");
    let mut engine = Config::new().open_rw(dir.path().join("db"))?;
    engine.expand("1998-foo", &f0)?;
    engine.expand("1998,2000", &f0)?;
    engine.expand("1999-bar", &f0)?;

    let mut found = Vec::new();
    engine.search(b"1998-foo", |f| found.push(f))?;
    hits(&found, 1);

    Ok(())
}

#[test_log::test]
fn e4_shared_prefix_two_files() -> subdex::Result<()> {
    let dir = tempfile::tempdir()?;
    let f0 = write_tempfile(&dir, "f0.txt");
    let f1 = write_tempfile(&dir, "f1.txt");
    let mut engine = Config::new().open_rw(dir.path().join("db"))?;
    engine.expand("1999-bar", &f0)?;
    engine.expand("1999-ba", &f1)?;

    let mut found = Vec::new();
    engine.search(b"1999-ba", |f| found.push(f))?;
    hits(&found, 2);

    Ok(())
}

#[test_log::test]
fn e6_close_reopen_and_dump_nonempty() -> subdex::Result<()> {
    let dir = tempfile::tempdir()?;
    let f0 = write_tempfile(&dir, "f0.txt");
    let db_path = dir.path().join("db");

    let mut engine = Config::new().open_rw(&db_path)?;
    for word in ["CAAAAA", "CCAAAA", "CCCAAA", "CCCCAA"] {
        engine.expand(word, &f0)?;
    }
    engine.close()?;

    let mut reopened = Config::new().open_rw(&db_path)?;
    let mut dump = Vec::new();
    reopened.dump(&mut dump)?;
    assert!(!dump.is_empty());

    let mut found = Vec::new();
    reopened.search(b"CCCC", |f| found.push(f))?;
    hits(&found, 1);

    Ok(())
}

/// Invariant 3: a sequence of expand/truncate followed by close/reopen
/// returns identical query results to the pre-close state.
#[test_log::test]
fn round_trip_preserves_query_results() -> subdex::Result<()> {
    let dir = tempfile::tempdir()?;
    let f0 = write_tempfile(&dir, "f0.txt");
    let f1 = write_tempfile(&dir, "f1.txt");
    let f2 = write_tempfile(&dir, "f2.txt");
    let db_path = dir.path().join("db");

    let mut engine = Config::new().open_rw(&db_path)?;
    engine.expand("alpha-beta", &f0)?;
    engine.expand("alpha-gamma", &f1)?;
    engine.expand("delta", &f2)?;
    engine.truncate_one(&f1)?;

    let mut before = Vec::new();
    engine.search(b"alpha", |f| before.push(f))?;
    before.sort_unstable();

    engine.close()?;

    let mut reopened = Config::new().open_rw(&db_path)?;
    let mut after = Vec::new();
    reopened.search(b"alpha", |f| after.push(f))?;
    after.sort_unstable();

    assert_eq!(before, after);
    hits(&after, 1);

    Ok(())
}

/// Invariant 2: after truncate_one, no search ever yields the truncated file.
#[test_log::test]
fn truncation_is_local_and_permanent() -> subdex::Result<()> {
    let dir = tempfile::tempdir()?;
    let f0 = write_tempfile(&dir, "f0.txt");
    let f1 = write_tempfile(&dir, "f1.txt");
    let mut engine = Config::new().open_rw(dir.path().join("db"))?;
    engine.expand("shared-word", &f0)?;
    engine.expand("shared-word", &f1)?;
    engine.truncate_one(&f0)?;

    let f0_index = 0u32;
    let mut found = Vec::new();
    engine.search(b"shared", |f| found.push(f))?;
    assert!(!found.contains(&f0_index));
    hits(&found, 1);

    Ok(())
}

/// Invariant 9: close never leaves the target path named "in progress";
/// immediately after close the original path is a complete, reopenable file.
#[test_log::test]
fn close_swaps_atomically_into_place() -> subdex::Result<()> {
    let dir = tempfile::tempdir()?;
    let f0 = write_tempfile(&dir, "f0.txt");
    let db_path = dir.path().join("db");

    let mut engine = Config::new().open_rw(&db_path)?;
    engine.expand("word", &f0)?;
    engine.close()?;

    assert!(db_path.is_file());
    let siblings: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n != "f0.txt" && n != "db")
        .collect();
    assert!(siblings.is_empty(), "leftover temp files: {siblings:?}");

    Ok(())
}

/// Needles longer than the configured hard cap are rejected without
/// touching the tree at all (spec.md §6 / §7).
#[test_log::test]
fn needle_hard_cap_is_enforced_by_default() -> subdex::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut engine = Config::new().open_rw(dir.path().join("db"))?;
    let needle = vec![b'q'; 257];
    let result = engine.search(&needle, |_| {});
    assert!(result.is_err());
    Ok(())
}

/// A read-only open of a database that doesn't exist yet fails rather
/// than silently creating one.
#[test_log::test]
fn read_only_open_of_missing_database_fails() {
    let dir = tempfile::tempdir().unwrap();
    let result = Config::new().open_ro(dir.path().join("does-not-exist"));
    assert!(result.is_err());
}

/// truncate_deleted removes every file the predicate reports as gone.
#[test_log::test]
fn truncate_deleted_removes_missing_files() -> subdex::Result<()> {
    let dir = tempfile::tempdir()?;
    let f0 = write_tempfile(&dir, "f0.txt");
    let f1 = write_tempfile(&dir, "f1.txt");
    let mut engine = Config::new().open_rw(dir.path().join("db"))?;
    engine.expand("keepme", &f0)?;
    engine.expand("keepme", &f1)?;

    let gone = f1.clone();
    engine.truncate_deleted(|p| p != gone)?;

    let mut found = Vec::new();
    engine.search(b"keepme", |f| found.push(f))?;
    hits(&found, 1);

    Ok(())
}

fn random_word(rng: &mut impl RngCore, len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    (0..len)
        .map(|_| ALPHABET[rng.next_u32() as usize % ALPHABET.len()] as char)
        .collect()
}

/// Randomized counterpart to `round_trip_preserves_query_results` and
/// `truncation_is_local_and_permanent`: every word from a random corpus is
/// findable before truncation, and every word belonging to a randomly chosen
/// truncated file is unfindable afterward, regardless of which words the
/// random seed happened to produce.
#[test_log::test]
fn random_corpus_exact_search_matches_expected_files() -> subdex::Result<()> {
    let mut prng = rng();
    let dir = tempfile::tempdir()?;
    let mut engine = Config::new().open_rw(dir.path().join("db"))?;

    let file_count = 8;
    let mut files = Vec::new();
    let mut words = Vec::new();
    for i in 0..file_count {
        let path = write_tempfile(&dir, &format!("f{i}.txt"));
        let word = random_word(&mut prng, 4 + prng.random_range(0..5));
        engine.expand(&word, &path)?;
        files.push(path);
        words.push(word);
    }

    for (i, word) in words.iter().enumerate() {
        let mut found = Vec::new();
        engine.search(word.as_bytes(), |f| found.push(f))?;
        assert!(
            found.contains(&(i as u32)),
            "file {i} indexed {word:?} but search didn't find it: {found:?}"
        );
    }

    let dropped = prng.random_range(0..file_count);
    engine.truncate_one(&files[dropped])?;
    let mut found = Vec::new();
    engine.search(words[dropped].as_bytes(), |f| found.push(f))?;
    assert!(
        !found.contains(&(dropped as u32)),
        "truncated file {dropped} still matched {:?}: {found:?}",
        words[dropped]
    );

    Ok(())
}

/// Forces real eviction mid-session (component C6) by opening with a
/// tiny `memory_limit`, then checks that `search`/`search_approx`
/// against a subtree that was written out and dropped from memory -- not
/// just held resident the whole time -- still return the right files,
/// both before and after a `close`/reopen cycle writes everything back
/// out and drops the in-memory tree entirely.
#[test_log::test]
fn eviction_under_tight_memory_limit_preserves_search_results() -> subdex::Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("db");

    let words = [
        "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india",
        "juliet", "kilo", "lima", "mike", "november", "oscar", "papa",
    ];

    let mut engine = Config::new().with_memory_limit(1).open_rw(&db_path)?;
    let mut files = Vec::new();
    for (i, word) in words.iter().enumerate() {
        let path = write_tempfile(&dir, &format!("f{i}.txt"));
        for start in 0..word.len() {
            engine.expand(&word[start..], &path)?;
        }
        files.push(path);
    }

    // A 1-byte budget forces every `expand`'s post-mutation `shrink` to
    // write out and drop whatever it can; only the keep chain of the
    // node just touched stays resident. If eviction corrupted state
    // instead of faulting correctly back in on the next access, these
    // searches would miss files whose subtree had to be reloaded.
    for (i, word) in words.iter().enumerate() {
        let mut found = Vec::new();
        engine.search(word.as_bytes(), |f| found.push(f))?;
        assert!(
            found.contains(&(i as u32)),
            "file {i} indexed {word:?} but search missed it after eviction: {found:?}"
        );

        found.clear();
        engine.search_approx(1, false, word.as_bytes(), |f| found.push(f))?;
        assert!(
            found.contains(&(i as u32)),
            "file {i} indexed {word:?} but search_approx missed it after eviction: {found:?}"
        );
    }

    engine.close()?;
    let mut engine = Config::new().with_memory_limit(1).open_rw(&db_path)?;
    for (i, word) in words.iter().enumerate() {
        let mut found = Vec::new();
        engine.search(word.as_bytes(), |f| found.push(f))?;
        assert!(
            found.contains(&(i as u32)),
            "file {i}'s {word:?} missing after close/reopen under a tight memory limit: {found:?}"
        );
    }

    Ok(())
}
