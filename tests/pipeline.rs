//! End-to-end feature table build from CSV files

use std::fs;
use std::path::Path;

use concert::data::table::{Cell, ColumnHints, Table};
use concert::data::SourceTables;
use concert::features::{FeatureJoinPipeline, FeatureSchema, MissingDataPolicy};
use concert::{ActivitySource, ArtistId, ConcertError, Config};

fn write_sources(dir: &Path) {
    fs::write(
        dir.join("concert_list.csv"),
        "artist_id,continent,city,closing_date,target_label\n\
         A,Europe,Paris,2023-01-10,3.5\n\
         B,Asia,Seoul,2023-01-10,1.0\n\
         C,Asia,Tokyo,2023-02-01,2.0\n\
         Z,Asia,Seoul,2023-02-01,9.0\n",
    )
    .unwrap();
    fs::write(
        dir.join("artist_list.csv"),
        "artist_id,gender,members\n\
         A,F,4\n\
         B,M,7\n\
         C,F,1\n",
    )
    .unwrap();
    fs::write(
        dir.join("vlive_data.csv"),
        "artist_id,upload_date,follower,playtime,view_count,like_count,comment_count\n\
         A,2023-01-11,1000,10,100,5,1\n\
         A,2023-01-12,1100,20,50,5,2\n\
         A,2023-01-10,9999,99,999,99,99\n\
         B,2023-01-11,300,1,9,1,0\n\
         C,2023-02-02,10,1,1,1,1\n",
    )
    .unwrap();
    fs::write(
        dir.join("mv_data.csv"),
        "artist_id,upload_date,view_count,like_count,dislike_count,comment_count\n\
         A,2023-01-15,500,50,2,7\n",
    )
    .unwrap();
    fs::write(
        dir.join("twitter_data.csv"),
        "artist_id,upload_date,follower,total_tweet,like_count,retweet_count,comment_count\n\
         A,2023-01-11,10,100,1,1,1\n\
         A,2023-01-13,12,101,2,2,2\n\
         B,2023-01-09,99,5,9,9,9\n\
         C,2023-02-03,5,1,0,0,0\n\
         C,2023-02-04,6,2,1,0,0\n",
    )
    .unwrap();
}

fn number(table: &Table, row: usize, column: &str) -> f64 {
    table
        .cell(row, column)
        .and_then(Cell::as_f64)
        .unwrap_or_else(|| panic!("no number at {}/{}", row, column))
}

#[test]
fn test_artist_without_social_activity_aborts() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let config = Config::default();
    let inputs = SourceTables::load_from(dir.path(), &config).unwrap();

    let err = FeatureJoinPipeline::from_config(&config).run(&inputs).unwrap_err();
    match err {
        ConcertError::MissingData {
            row,
            artist,
            activity,
            ..
        } => {
            assert_eq!(row, 1);
            assert_eq!(artist, ArtistId::new("B"));
            assert_eq!(activity, ActivitySource::SocialMedia);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_feature_table_values() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let config = Config::default();
    let inputs = SourceTables::load_from(dir.path(), &config).unwrap();

    let out = FeatureJoinPipeline::from_config(&config)
        .with_policy(MissingDataPolicy::Nan)
        .run(&inputs)
        .unwrap();
    let t = &out.table;

    // Z has no artist record
    assert_eq!(t.len(), 3);
    assert_eq!(out.report.dropped_concerts.len(), 1);

    // A: the record on the closing date itself is excluded
    assert_eq!(number(t, 0, "v_view_count"), 150.0);
    assert_eq!(number(t, 0, "v_follower"), 1100.0);
    assert_eq!(number(t, 0, "m_view_count"), 500.0);
    assert_eq!(number(t, 0, "t_follower"), 12.0);
    assert_eq!(number(t, 0, "t_follower_2"), 10.0);

    // B: nothing on social media after the concert
    assert!(number(t, 1, "t_follower").is_nan());
    assert!(number(t, 1, "t_follower_2").is_nan());
    assert_eq!(number(t, 1, "t_like_count"), 0.0);
    assert_eq!(number(t, 1, "t_retweet_count"), 0.0);
    assert_eq!(number(t, 1, "t_comment_count"), 0.0);
    assert_eq!(number(t, 1, "m_view_count"), 0.0);

    // C: two social snapshots, newest first
    assert_eq!(number(t, 2, "t_follower"), 6.0);
    assert_eq!(number(t, 2, "t_follower_2"), 5.0);

    for row in 0..t.len() {
        let continent = number(t, row, "continent_Asia") + number(t, row, "continent_Europe");
        let gender = number(t, row, "gender_F") + number(t, row, "gender_M");
        assert_eq!(continent, 1.0);
        assert_eq!(gender, 1.0);
    }
}

#[test]
fn test_saved_output_is_byte_identical_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let config = Config::default();

    let render = |name: &str| {
        let inputs = SourceTables::load_from(dir.path(), &config).unwrap();
        let out = FeatureJoinPipeline::from_config(&config)
            .with_policy(MissingDataPolicy::DropRow)
            .run(&inputs)
            .unwrap();
        let path = dir.path().join(name);
        out.save(&path, None).unwrap();
        fs::read(path).unwrap()
    };

    assert_eq!(render("first.csv"), render("second.csv"));
}

#[test]
fn test_saved_vocabulary_freezes_columns() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let config = Config::default();
    let inputs = SourceTables::load_from(dir.path(), &config).unwrap();
    let vocab_path = dir.path().join("vocabulary.json");
    let table_path = dir.path().join("features.csv");

    let first = FeatureJoinPipeline::from_config(&config)
        .with_policy(MissingDataPolicy::DropRow)
        .run(&inputs)
        .unwrap();
    first.save(&table_path, Some(&vocab_path)).unwrap();

    let schema = FeatureSchema::load(&vocab_path).unwrap();
    let again = FeatureJoinPipeline::from_config(&config)
        .with_policy(MissingDataPolicy::DropRow)
        .with_vocabulary(schema)
        .run(&inputs)
        .unwrap();
    assert_eq!(again.table.columns(), first.table.columns());

    let reread = Table::read_csv(
        &table_path,
        &ColumnHints {
            text: vec!["artist_id"],
            dates: vec!["closing_date"],
        },
    )
    .unwrap();
    assert_eq!(reread.columns(), first.table.columns());
    assert_eq!(reread.len(), first.table.len());
}
