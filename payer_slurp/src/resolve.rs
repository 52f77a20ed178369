use reqwest::Url;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::{
    fetch::Fetcher,
    fhir::{FhirEntity, Location, Organization, Practitioner, reference_id, resolve_url},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    pub id: String,
    pub url: Url,
}

#[derive(Debug)]
enum Slot<E> {
    Present(E),
    Absent { failures: u32 },
}

/// Per-payer memo of fetched entities of one kind, keyed by reference id.
///
/// Unavailable ids are remembered as well; they are re-fetched at most
/// `refetch_limit` more times during the run.
#[derive(Debug)]
pub struct EntityCache<E> {
    entries: BTreeMap<String, Slot<E>>,
    fetches: usize,
}

impl<E> Default for EntityCache<E> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            fetches: 0,
        }
    }
}

impl<E: FhirEntity> EntityCache<E> {
    /// Resolves a `"<Type>/<id>"` reference against `base_url`, fetching the
    /// entity on first sight. Returns `None` only for malformed references.
    pub async fn resolve(
        &mut self,
        fetcher: &Fetcher,
        base_url: &Url,
        reference: &str,
        refetch_limit: u32,
    ) -> Option<ResolvedReference> {
        let Some(id) = reference_id(reference, E::RESOURCE_TYPE) else {
            if !reference.is_empty() {
                debug!(reference, expected = E::RESOURCE_TYPE, "skipping malformed reference");
            }
            return None;
        };
        let Some(url) = resolve_url(base_url, reference) else {
            debug!(reference, "skipping reference that does not join onto the base URL");
            return None;
        };

        let needs_fetch = match self.entries.get(id) {
            None => true,
            Some(Slot::Present(_)) => false,
            Some(Slot::Absent { failures }) => *failures <= refetch_limit,
        };
        if needs_fetch {
            self.fetches += 1;
            let fetched = fetcher
                .fetch_json(&url)
                .await
                .and_then(|value| match serde_json::from_value::<E>(value) {
                    Ok(entity) => Some(entity),
                    Err(err) => {
                        warn!(%url, error = %err, "unreadable {} body; treating as unavailable", E::RESOURCE_TYPE);
                        None
                    }
                });
            let slot = match (fetched, self.entries.remove(id)) {
                (Some(entity), _) => Slot::Present(entity),
                (None, Some(Slot::Absent { failures })) => Slot::Absent {
                    failures: failures + 1,
                },
                (None, _) => Slot::Absent { failures: 1 },
            };
            self.entries.insert(id.to_string(), slot);
        }

        Some(ResolvedReference {
            id: id.to_string(),
            url,
        })
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        match self.entries.get(id)? {
            Slot::Present(entity) => Some(entity),
            Slot::Absent { .. } => None,
        }
    }

    /// Every id seen this run in id order, with its entity when one was fetched.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&E>)> {
        self.entries.iter().map(|(id, slot)| {
            let entity = match slot {
                Slot::Present(entity) => Some(entity),
                Slot::Absent { .. } => None,
            };
            (id.as_str(), entity)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn absent(&self) -> usize {
        self.entries
            .values()
            .filter(|slot| matches!(slot, Slot::Absent { .. }))
            .count()
    }

    /// Logical fetches issued through this cache (retries not counted).
    pub fn fetches(&self) -> usize {
        self.fetches
    }
}

/// The three entity caches of one payer run.
pub struct Resolver {
    base_url: Url,
    refetch_limit: u32,
    pub organizations: EntityCache<Organization>,
    pub locations: EntityCache<Location>,
    pub practitioners: EntityCache<Practitioner>,
}

impl Resolver {
    pub fn new(base_url: Url, refetch_limit: u32) -> Self {
        Self {
            base_url,
            refetch_limit,
            organizations: EntityCache::default(),
            locations: EntityCache::default(),
            practitioners: EntityCache::default(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn organization(
        &mut self,
        fetcher: &Fetcher,
        reference: &str,
    ) -> Option<ResolvedReference> {
        self.organizations
            .resolve(fetcher, &self.base_url, reference, self.refetch_limit)
            .await
    }

    pub async fn location(&mut self, fetcher: &Fetcher, reference: &str) -> Option<ResolvedReference> {
        self.locations
            .resolve(fetcher, &self.base_url, reference, self.refetch_limit)
            .await
    }

    pub async fn practitioner(
        &mut self,
        fetcher: &Fetcher,
        reference: &str,
    ) -> Option<ResolvedReference> {
        self.practitioners
            .resolve(fetcher, &self.base_url, reference, self.refetch_limit)
            .await
    }

    pub fn entity_fetches(&self) -> usize {
        self.organizations.fetches() + self.locations.fetches() + self.practitioners.fetches()
    }
}
