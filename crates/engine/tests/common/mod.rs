//! Shared fixtures for engine integration tests
//!
//! Models a company directory: each `Company` owns at most one `Logo`, and
//! `CompanyValue` is the plain value pairing of `Company`.

#![allow(dead_code)]

use cordon_core::{Object, ObjectRef, Value};
use cordon_engine::{Controller, ControllerConfig, ManageableRepresented, ManageableSource};
use cordon_store::MemoryStore;
use std::sync::Once;

#[derive(Debug, Clone, PartialEq)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub logo_id: Option<i64>,
}

impl Object for Company {
    const TYPE_NAME: &'static str = "Company";
    const PRIMARY_KEY: &'static str = "id";
    const PROPERTIES: &'static [&'static str] = &["id", "name", "logo_id"];

    fn primary_key(&self) -> Value {
        Value::Int(self.id)
    }

    fn field(&self, path: &str) -> Option<Value> {
        match path {
            "id" => Some(Value::Int(self.id)),
            "name" => Some(Value::from(self.name.as_str())),
            "logo_id" => Some(self.logo_id.map(Value::Int).unwrap_or(Value::Null)),
            _ => None,
        }
    }

    fn owned(&self) -> Vec<ObjectRef> {
        self.logo_id
            .map(|id| ObjectRef::new(Logo::TYPE_NAME, id))
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Logo {
    pub id: i64,
    pub url: String,
}

impl Object for Logo {
    const TYPE_NAME: &'static str = "Logo";
    const PRIMARY_KEY: &'static str = "id";
    const PROPERTIES: &'static [&'static str] = &["id", "url"];

    fn primary_key(&self) -> Value {
        Value::Int(self.id)
    }

    fn field(&self, path: &str) -> Option<Value> {
        match path {
            "id" => Some(Value::Int(self.id)),
            "url" => Some(Value::from(self.url.as_str())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompanyValue {
    pub id: i64,
    pub name: String,
    pub logo_id: Option<i64>,
}

impl ManageableSource for Company {
    type Represented = CompanyValue;

    fn from_represented(value: &CompanyValue) -> Self {
        Self {
            id: value.id,
            name: value.name.clone(),
            logo_id: value.logo_id,
        }
    }
}

impl ManageableRepresented for CompanyValue {
    type Source = Company;

    fn from_source(source: &Company) -> Self {
        Self {
            id: source.id,
            name: source.name.clone(),
            logo_id: source.logo_id,
        }
    }
}

pub fn company(id: i64, name: &str) -> Company {
    Company {
        id,
        name: name.to_string(),
        logo_id: Some(id * 10),
    }
}

pub fn logo(id: i64) -> Logo {
    Logo {
        id,
        url: format!("https://logos.test/{}.png", id),
    }
}

/// Install a test subscriber once; set `RUST_LOG` to see engine events.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
            )
            .try_init();
    });
}

pub fn open(name: &str) -> Controller<MemoryStore> {
    init_tracing();
    Controller::open(ControllerConfig::named(name), || Ok(MemoryStore::open())).unwrap()
}

/// Companies A, B and C (ids 1..=3), each owning logo `id * 10`.
pub async fn seeded(name: &str) -> Controller<MemoryStore> {
    let controller = open(name);
    controller
        .add(vec![logo(10), logo(20), logo(30)])
        .await
        .unwrap();
    controller
        .add(vec![company(1, "A"), company(2, "B"), company(3, "C")])
        .await
        .unwrap();
    controller
}
