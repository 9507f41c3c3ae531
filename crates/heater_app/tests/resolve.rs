use std::io::Write;
use std::time::Duration;

use clap::Parser;
use heater_app::{resolve, Cli, ConfigError, ConfigFile, Target};
use pretty_assertions::assert_eq;
use serde_json::json;

fn cli(args: &[&str]) -> Cli {
    Cli::parse_from(std::iter::once("view-heater").chain(args.iter().copied()))
}

#[test]
fn overlapping_sections_are_rejected() {
    let pairs = [
        ("", "db"),
        ("/", "/db"),
        ("///", "db"),
        ("/", "db/"),
        ("", "db///"),
    ];
    for (server_suffix, db) in pairs {
        let couch = format!("http://localhost:5984{server_suffix}");
        let config = json!({
            couch.clone(): { format!("/{db}"): { "log": "debug" } },
            format!("{couch}/{db}"): { "log": "debug" },
        });
        let err = ConfigFile::parse(&config.to_string()).unwrap_err();
        assert!(
            matches!(err, ConfigError::Overlapping(ref url) if url == "http://localhost:5984/db"),
            "{server_suffix:?} + {db:?} gave {err}"
        );
        assert!(err.to_string().starts_with("Overlapping"));
    }
}

#[test]
fn sections_layer_over_flags_in_priority_order() {
    let file = ConfigFile::parse(
        &json!({
            "age": 60000,
            "seq": 40,
            "http://localhost:5984": {
                "seq": 30,
                "compact": 500,
                "/music": { "age": 10000 },
                "/photos": {}
            }
        })
        .to_string(),
    )
    .unwrap();
    let targets = resolve(&cli(&["--compact", "9000", "--age", "1"]), Some(&file)).unwrap();

    let [Target::Server(server)] = targets.as_slice() else {
        panic!("expected one server target, got {targets:?}");
    };
    assert_eq!(server.server.to_string(), "http://localhost:5984");
    assert!(!server.all);
    assert_eq!(server.config.max_age, Duration::from_secs(60));
    assert_eq!(server.config.max_seq, 30);
    assert_eq!(server.config.compact_threshold, 500);

    let names: Vec<_> = server.databases.iter().map(|db| db.db.name()).collect();
    assert_eq!(names, vec!["music", "photos"]);
    assert_eq!(server.databases[0].config.max_age, Duration::from_secs(10));
    assert_eq!(server.databases[0].config.max_seq, 30);
    assert_eq!(server.databases[1].config.max_age, Duration::from_secs(60));
}

#[test]
fn positional_database_picks_up_its_section() {
    let file = ConfigFile::parse(
        &json!({
            "http://localhost:5984": {
                "seq": 7,
                "security": { "music": { "admins": { "roles": ["ops"] } } },
                "/music": { "age": 2000 }
            }
        })
        .to_string(),
    )
    .unwrap();
    let targets = resolve(&cli(&["http://localhost:5984//music/"]), Some(&file)).unwrap();

    let [Target::Database(target)] = targets.as_slice() else {
        panic!("expected one database target, got {targets:?}");
    };
    assert_eq!(target.db.to_string(), "http://localhost:5984/music");
    assert_eq!(target.config.max_seq, 7);
    assert_eq!(target.config.max_age, Duration::from_secs(2));
    assert_eq!(target.security, Some(json!({ "admins": { "roles": ["ops"] } })));
}

#[test]
fn couch_flag_with_db_or_all() {
    let targets = resolve(
        &cli(&["--couch", "http://localhost:5984/", "--db", "music", "--seq", "3"]),
        None,
    )
    .unwrap();
    let [Target::Database(target)] = targets.as_slice() else {
        panic!("expected one database target, got {targets:?}");
    };
    assert_eq!(target.db.name(), "music");
    assert_eq!(target.config.max_seq, 3);

    let targets = resolve(
        &cli(&["--couch", "http://localhost:5984", "--all", "--refresh", "60000"]),
        None,
    )
    .unwrap();
    let [Target::Server(server)] = targets.as_slice() else {
        panic!("expected one server target, got {targets:?}");
    };
    assert!(server.all);
    assert_eq!(server.interval, Duration::from_secs(60));
    assert!(server.databases.is_empty());
}

#[test]
fn server_without_databases_needs_all() {
    let err = resolve(&cli(&["--couch", "http://localhost:5984"]), None).unwrap_err();
    assert!(matches!(err, ConfigError::NoDatabases(_)));
}

#[test]
fn config_file_servers_are_default_targets() {
    let file = ConfigFile::parse(
        &json!({
            "all": true,
            "http://a.example:5984": {},
            "https://b.example": { "all": false, "/logs": {} }
        })
        .to_string(),
    )
    .unwrap();
    let targets = resolve(&cli(&[]), Some(&file)).unwrap();
    assert_eq!(targets.len(), 2);
    assert!(matches!(&targets[0], Target::Server(s) if s.all));
    assert!(matches!(&targets[1], Target::Server(s) if !s.all && s.databases.len() == 1));
}

#[test]
fn nothing_to_heat_is_an_error() {
    let err = resolve(&cli(&[]), None).unwrap_err();
    assert!(matches!(err, ConfigError::NoTargets));
}

#[test]
fn user_and_password_apply_to_targets_without_credentials() {
    let targets = resolve(
        &cli(&[
            "--user",
            "admin",
            "--pass",
            "secret",
            "http://localhost:5984/music",
            "http://bob:pw@localhost:5984/photos",
        ]),
        None,
    )
    .unwrap();
    let users: Vec<_> = targets
        .iter()
        .map(|target| match target {
            Target::Database(db) => db.db.credentials().map(|c| c.username.clone()),
            Target::Server(_) => None,
        })
        .collect();
    assert_eq!(users, vec![Some("admin".to_string()), Some("bob".to_string())]);
}

#[test]
fn loads_config_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{ "http://localhost:5984": {{ "/music": {{}} }} }}"#).unwrap();
    let config = ConfigFile::load(file.path()).unwrap();
    assert_eq!(config.server_urls().collect::<Vec<_>>(), vec!["http://localhost:5984"]);

    let err = ConfigFile::load(&file.path().with_extension("missing")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));

    let err = ConfigFile::parse(r#"{ "http://localhost:5984": 3 }"#).unwrap_err();
    assert!(matches!(err, ConfigError::NotAnObject(_)));
}
