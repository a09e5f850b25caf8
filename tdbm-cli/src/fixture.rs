use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tdbm_api::RawRow;
use tdbm_core::{
    BeanFactory, ClassResolver, DiscriminatorResolver, InheritanceResolver, QueryDefinition,
    ResultIterator, Schema, Session, SessionConfig,
};
use tdbm_memory::{MemoryConnection, NamedTemplateEngine};

/// Canned database plus named queries, loaded from JSON.
#[derive(Debug, Deserialize)]
pub struct Fixture {
    pub schema: Schema,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub discriminator: Option<Discriminator>,
    #[serde(default)]
    pub result_sets: Vec<ResultSet>,
    #[serde(default)]
    pub counts: Vec<CountQuery>,
    #[serde(default)]
    pub queries: BTreeMap<String, QueryDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct ResultSet {
    pub sql: String,
    pub rows: Vec<RawRow>,
}

#[derive(Debug, Deserialize)]
pub struct CountQuery {
    pub sql: String,
    /// SQL of the result set being counted.
    pub of: String,
}

#[derive(Debug, Deserialize)]
pub struct Discriminator {
    pub column: String,
    pub classes: BTreeMap<String, String>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid fixture {}", path.display()))
    }

    pub fn connection(&self) -> MemoryConnection {
        let conn = MemoryConnection::new();
        for set in &self.result_sets {
            conn.register(set.sql.clone(), set.rows.clone());
        }
        for count in &self.counts {
            conn.register_count(count.sql.clone(), count.of.clone());
        }
        conn
    }

    /// Session whose factory knows every class reachable from the fixture,
    /// each backed by a generic bean.
    pub fn session(&self) -> Session {
        let mut classes: BTreeSet<String> = self
            .schema
            .tables()
            .map(|(table, _)| self.schema.class_name_for(table))
            .collect();
        classes.extend(self.queries.values().filter_map(|q| q.class_name.clone()));

        let resolver: Arc<dyn ClassResolver> = match &self.discriminator {
            Some(d) => {
                classes.extend(d.classes.values().cloned());
                Arc::new(
                    d.classes
                        .iter()
                        .fold(DiscriminatorResolver::new(d.column.clone()), |r, (k, v)| {
                            r.map(k.clone(), v.clone())
                        }),
                )
            }
            None => Arc::new(InheritanceResolver),
        };

        let mut factory = BeanFactory::new();
        for class in classes {
            factory.register_generic(class);
        }
        Session::with_options(self.schema.clone(), factory, resolver, self.session.clone())
    }

    pub fn query(&self, name: &str) -> Result<&QueryDefinition> {
        self.queries.get(name).ok_or_else(|| {
            let known: Vec<_> = self.queries.keys().map(String::as_str).collect();
            anyhow!("unknown query `{name}` (known: {})", known.join(", "))
        })
    }

    pub fn iterator(
        &self,
        conn: &MemoryConnection,
        session: &Session,
        name: &str,
    ) -> Result<ResultIterator<MemoryConnection>> {
        let definition = self.query(name)?;
        Ok(ResultIterator::from_definition(
            Arc::new(conn.clone()),
            Arc::new(NamedTemplateEngine),
            session.clone(),
            definition,
        )?)
    }
}
