//! Replace-for-server atomicity as seen from an independent connection
//!
//! A writer repeatedly swaps a whole scope while a reader on a second
//! connection to the same WAL database checks it only ever sees one
//! complete generation.

#[cfg(test)]
mod matrix_replace_tests {
    use dropstats::db::Database;
    use dropstats::matrix::{DropMatrixElement, DropMatrixRepo};
    use dropstats::types::{Server, SourceCategory};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    const ROWS: i64 = 200;
    const GENERATIONS: i64 = 20;

    fn generation(generation: i64) -> Vec<DropMatrixElement> {
        (0..ROWS)
            .map(|item_id| DropMatrixElement {
                server: Server::CN,
                stage_id: 1,
                item_id,
                quantity: generation,
                times: generation,
                quantity_buckets: BTreeMap::new(),
                source_category: SourceCategory::All,
                start_time: None,
                end_time: None,
            })
            .collect()
    }

    #[test]
    fn test_reader_never_sees_partial_replace() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("matrix.db");

        let writer_db = Database::open(&db_path).unwrap();
        let reader_db = Database::open(&db_path).unwrap();
        let writer = DropMatrixRepo::new(writer_db);
        let reader = DropMatrixRepo::new(reader_db);

        writer
            .replace_for_server(Server::CN, SourceCategory::All, &generation(0))
            .unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let writer_done = done.clone();
        let handle = thread::spawn(move || {
            for g in 1..=GENERATIONS {
                writer
                    .replace_for_server(Server::CN, SourceCategory::All, &generation(g))
                    .unwrap();
            }
            writer_done.store(true, Ordering::SeqCst);
        });

        let mut observed = Vec::new();
        loop {
            let finished = done.load(Ordering::SeqCst);
            let rows = reader
                .get_by_server_and_source_category(Server::CN, SourceCategory::All)
                .unwrap();

            assert_eq!(rows.len() as i64, ROWS, "partial scope visible");
            let g = rows[0].quantity;
            assert!(rows.iter().all(|r| r.quantity == g), "mixed generations visible");
            observed.push(g);

            if finished {
                break;
            }
        }
        handle.join().unwrap();

        assert_eq!(observed.last().copied(), Some(GENERATIONS));
        assert!(observed.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_other_scopes_survive_replace() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("matrix.db")).unwrap();
        let repo = DropMatrixRepo::new(db);

        let mut us = generation(1);
        for row in &mut us {
            row.server = Server::US;
        }
        repo.replace_for_server(Server::US, SourceCategory::All, &us).unwrap();
        repo.replace_for_server(Server::CN, SourceCategory::All, &generation(2))
            .unwrap();
        repo.replace_for_server(Server::CN, SourceCategory::All, &[]).unwrap();

        assert!(repo
            .get_by_server_and_source_category(Server::CN, SourceCategory::All)
            .unwrap()
            .is_empty());
        assert_eq!(
            repo.get_by_server_and_source_category(Server::US, SourceCategory::All)
                .unwrap()
                .len() as i64,
            ROWS
        );
    }
}
