use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::models::{Activity, Competition, Dataset, User};

pub const USERS_FILE: &str = "users.csv";
pub const COMPETITIONS_FILE: &str = "competitions.csv";
pub const ACTIVITY_FILE: &str = "user_activity.csv";

pub fn write_dataset(dir: &Path, dataset: &Dataset) -> anyhow::Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create data directory {}", dir.display()))?;

    write_table(&dir.join(USERS_FILE), &dataset.users)?;
    write_table(&dir.join(COMPETITIONS_FILE), &dataset.competitions)?;
    write_table(&dir.join(ACTIVITY_FILE), &dataset.activities)?;

    info!(dir = %dir.display(), "Wrote dataset tables");
    Ok(())
}

pub fn load_dataset(dir: &Path) -> anyhow::Result<Dataset> {
    let users: Vec<User> = read_table(&dir.join(USERS_FILE))?;
    let competitions: Vec<Competition> = read_table(&dir.join(COMPETITIONS_FILE))?;
    let activities: Vec<Activity> = read_table(&dir.join(ACTIVITY_FILE))?;

    info!(
        users = users.len(),
        competitions = competitions.len(),
        activities = activities.len(),
        "Loaded dataset tables"
    );

    Ok(Dataset {
        users,
        competitions,
        activities,
    })
}

fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
    }
    writer.flush()?;
    Ok(())
}

fn read_table<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut rows = Vec::new();

    for (line, result) in reader.deserialize::<T>().enumerate() {
        let row = result.with_context(|| {
            format!("malformed record {} in {}", line + 1, path.display())
        })?;
        rows.push(row);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorConfig;
    use crate::generator;
    use crate::models::Stage;

    #[test]
    fn tables_round_trip_through_csv() {
        let dataset = generator::generate(&GeneratorConfig {
            num_users: 150,
            ..GeneratorConfig::default()
        })
        .unwrap();
        let dir = tempfile::tempdir().unwrap();

        write_dataset(dir.path(), &dataset).unwrap();
        let loaded = load_dataset(dir.path()).unwrap();

        assert_eq!(loaded.users.len(), dataset.users.len());
        assert_eq!(loaded.competitions.len(), dataset.competitions.len());
        assert_eq!(loaded.activities.len(), dataset.activities.len());
        assert_eq!(loaded, dataset);
    }

    #[test]
    fn writes_snake_case_headers_and_labels() {
        let dataset = generator::generate(&GeneratorConfig {
            num_users: 50,
            ..GeneratorConfig::default()
        })
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &dataset).unwrap();

        let users = fs::read_to_string(dir.path().join(USERS_FILE)).unwrap();
        assert!(users.starts_with("user_id,signup_date,user_segment,variant_group"));

        let activity = fs::read_to_string(dir.path().join(ACTIVITY_FILE)).unwrap();
        assert!(activity.starts_with(
            "activity_id,user_id,competition_id,activity_timestamp,activity_type,session_duration"
        ));
        assert!(activity.contains(Stage::Signup.as_str()));
    }

    #[test]
    fn missing_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_dataset(dir.path()).unwrap_err();
        assert!(err.to_string().contains(USERS_FILE));
    }

    #[test]
    fn malformed_row_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &Dataset::default()).unwrap();
        fs::write(
            dir.path().join(USERS_FILE),
            "user_id,signup_date,user_segment,variant_group\n1,2025-09-01,student,holdout\n",
        )
        .unwrap();

        assert!(load_dataset(dir.path()).is_err());
    }
}
