// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Capability-typed provider registry and dependency injection.
//!
//! One active provider per capability (dense embedding, sparse embedding,
//! reranking, vector store), constructed lazily from registered factories
//! and held as singletons for the registry's lifetime. Components never
//! import each other's concrete types for wiring; they implement
//! [`FromRegistry`] and declare what they need by resolving capabilities.
//!
//! Singletons are initialized under a lock and read lock-free afterwards;
//! test doubles go through `set_override`, which shadows (without touching)
//! the constructed singleton.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::OnceCell;

use crate::config::{StoreBackend, WeaverConfig};
use crate::embedding::{
    DenseEmbedder, LexicalSparseEmbedder, RemoteDenseEmbedder, RemoteReranker, Reranker,
    SparseEmbedder,
};
use crate::error::ProviderError;
use crate::store::{MemoryStore, QdrantStore, VectorStore};

/// The four provider capabilities the core binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    DenseEmbedding,
    SparseEmbedding,
    Reranking,
    VectorStore,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DenseEmbedding => "dense_embedding",
            Self::SparseEmbedding => "sparse_embedding",
            Self::Reranking => "reranking",
            Self::VectorStore => "vector_store",
        }
    }

    /// The config key that selects the active variant for this capability.
    fn variant_key(&self) -> &'static str {
        match self {
            Self::DenseEmbedding => "dense_variant",
            Self::SparseEmbedding => "sparse_variant",
            Self::Reranking => "rerank_variant",
            Self::VectorStore => "store.backend",
        }
    }
}

/// A constructed provider held behind the matching trait object.
#[derive(Clone)]
pub enum ProviderInstance {
    Dense(Arc<dyn DenseEmbedder>),
    Sparse(Arc<dyn SparseEmbedder>),
    Rerank(Arc<dyn Reranker>),
    Store(Arc<dyn VectorStore>),
}

impl ProviderInstance {
    fn capability(&self) -> Capability {
        match self {
            Self::Dense(_) => Capability::DenseEmbedding,
            Self::Sparse(_) => Capability::SparseEmbedding,
            Self::Rerank(_) => Capability::Reranking,
            Self::Store(_) => Capability::VectorStore,
        }
    }
}

/// Static description of a provider variant.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub capability: Capability,
    pub variant: String,
    /// Settings keys the factory needs; reported when resolution fails.
    pub required_settings: Vec<String>,
}

type Factory = Box<dyn Fn(&WeaverConfig) -> Result<ProviderInstance, ProviderError> + Send + Sync>;

/// Services constructible from registry capabilities alone.
pub trait FromRegistry: Sized {
    fn construct(registry: &Registry) -> Result<Self, ProviderError>;
}

/// Typed registry of provider variants with singleton resolution.
pub struct Registry {
    config: WeaverConfig,
    factories: HashMap<(Capability, String), (ProviderDescriptor, Factory)>,
    dense: OnceCell<Arc<dyn DenseEmbedder>>,
    sparse: OnceCell<Arc<dyn SparseEmbedder>>,
    rerank: OnceCell<Option<Arc<dyn Reranker>>>,
    store: OnceCell<Arc<dyn VectorStore>>,
    overrides: RwLock<HashMap<Capability, ProviderInstance>>,
}

impl Registry {
    /// Registry with the built-in variants registered.
    pub fn with_builtins(config: WeaverConfig) -> Self {
        let mut registry = Self::empty(config);
        registry.register(
            ProviderDescriptor {
                capability: Capability::DenseEmbedding,
                variant: "remote-dense".to_string(),
                required_settings: vec!["dense.url".to_string()],
            },
            Box::new(|config| {
                Ok(ProviderInstance::Dense(Arc::new(RemoteDenseEmbedder::new(
                    &config.dense,
                ))))
            }),
        );
        registry.register(
            ProviderDescriptor {
                capability: Capability::SparseEmbedding,
                variant: "lexical".to_string(),
                required_settings: vec![],
            },
            Box::new(|_| Ok(ProviderInstance::Sparse(Arc::new(LexicalSparseEmbedder::new())))),
        );
        registry.register(
            ProviderDescriptor {
                capability: Capability::Reranking,
                variant: "remote-rerank".to_string(),
                required_settings: vec!["rerank.url".to_string()],
            },
            Box::new(|config| {
                Ok(ProviderInstance::Rerank(Arc::new(RemoteReranker::new(
                    &config.rerank,
                )?)))
            }),
        );
        registry.register(
            ProviderDescriptor {
                capability: Capability::VectorStore,
                variant: "qdrant".to_string(),
                required_settings: vec!["store.qdrant.url".to_string()],
            },
            Box::new(|config| {
                let store = QdrantStore::connect(
                    &config.store.qdrant,
                    config.store.upsert_batch_size,
                )
                .map_err(|e| ProviderError::NotConfigured(format!("qdrant store: {e}")))?;
                Ok(ProviderInstance::Store(Arc::new(store)))
            }),
        );
        registry.register(
            ProviderDescriptor {
                capability: Capability::VectorStore,
                variant: "memory".to_string(),
                required_settings: vec![],
            },
            Box::new(|config| {
                let store = MemoryStore::open(&config.store)
                    .map_err(|e| ProviderError::NotConfigured(format!("memory store: {e}")))?;
                Ok(ProviderInstance::Store(Arc::new(store)))
            }),
        );
        registry
    }

    /// Registry with no variants; extension point for embedders the crate
    /// does not ship.
    pub fn empty(config: WeaverConfig) -> Self {
        Self {
            config,
            factories: HashMap::new(),
            dense: OnceCell::new(),
            sparse: OnceCell::new(),
            rerank: OnceCell::new(),
            store: OnceCell::new(),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WeaverConfig {
        &self.config
    }

    /// Register a provider variant.
    pub fn register(&mut self, descriptor: ProviderDescriptor, factory: Factory) {
        self.factories.insert(
            (descriptor.capability, descriptor.variant.clone()),
            (descriptor, factory),
        );
    }

    /// Install a test double for a capability. Shadows the singleton until
    /// [`Registry::clear_overrides`].
    pub fn set_override(&self, instance: ProviderInstance) {
        let capability = instance.capability();
        self.overrides
            .write()
            .expect("override lock poisoned")
            .insert(capability, instance);
    }

    pub fn clear_overrides(&self) {
        self.overrides
            .write()
            .expect("override lock poisoned")
            .clear();
    }

    fn override_for(&self, capability: Capability) -> Option<ProviderInstance> {
        self.overrides
            .read()
            .expect("override lock poisoned")
            .get(&capability)
            .cloned()
    }

    fn unavailable(&self, capability: Capability, variant: &str) -> ProviderError {
        let missing = self
            .factories
            .get(&(capability, variant.to_string()))
            .map(|(descriptor, _)| descriptor.required_settings.clone())
            .unwrap_or_else(|| vec![capability.variant_key().to_string()]);
        ProviderError::Unavailable {
            variant: variant.to_string(),
            missing,
        }
    }

    fn build(&self, capability: Capability, variant: &str) -> Result<ProviderInstance, ProviderError> {
        let Some((_, factory)) = self.factories.get(&(capability, variant.to_string())) else {
            return Err(self.unavailable(capability, variant));
        };
        factory(&self.config)
    }

    /// Resolve the active dense embedder.
    pub fn resolve_dense(&self) -> Result<Arc<dyn DenseEmbedder>, ProviderError> {
        if let Some(ProviderInstance::Dense(dense)) = self.override_for(Capability::DenseEmbedding)
        {
            return Ok(dense);
        }
        self.dense
            .get_or_try_init(|| {
                let variant = self.config.dense_variant.clone();
                match self.build(Capability::DenseEmbedding, &variant)? {
                    ProviderInstance::Dense(dense) => Ok(dense),
                    _ => Err(self.unavailable(Capability::DenseEmbedding, &variant)),
                }
            })
            .cloned()
    }

    /// Resolve the active sparse embedder.
    pub fn resolve_sparse(&self) -> Result<Arc<dyn SparseEmbedder>, ProviderError> {
        if let Some(ProviderInstance::Sparse(sparse)) =
            self.override_for(Capability::SparseEmbedding)
        {
            return Ok(sparse);
        }
        self.sparse
            .get_or_try_init(|| {
                let variant = self.config.sparse_variant.clone();
                match self.build(Capability::SparseEmbedding, &variant)? {
                    ProviderInstance::Sparse(sparse) => Ok(sparse),
                    _ => Err(self.unavailable(Capability::SparseEmbedding, &variant)),
                }
            })
            .cloned()
    }

    /// Resolve the reranker, if one is configured. An empty variant id means
    /// reranking is disabled, not an error.
    pub fn resolve_reranker(&self) -> Result<Option<Arc<dyn Reranker>>, ProviderError> {
        if let Some(ProviderInstance::Rerank(reranker)) = self.override_for(Capability::Reranking) {
            return Ok(Some(reranker));
        }
        self.rerank
            .get_or_try_init(|| {
                let variant = self.config.rerank_variant.clone();
                if variant.is_empty() {
                    return Ok(None);
                }
                match self.build(Capability::Reranking, &variant)? {
                    ProviderInstance::Rerank(reranker) => Ok(Some(reranker)),
                    _ => Err(self.unavailable(Capability::Reranking, &variant)),
                }
            })
            .cloned()
    }

    /// Resolve the active vector store.
    pub fn resolve_store(&self) -> Result<Arc<dyn VectorStore>, ProviderError> {
        if let Some(ProviderInstance::Store(store)) = self.override_for(Capability::VectorStore) {
            return Ok(store);
        }
        self.store
            .get_or_try_init(|| {
                let variant = match self.config.store.backend {
                    StoreBackend::Qdrant => "qdrant",
                    StoreBackend::Memory => "memory",
                };
                match self.build(Capability::VectorStore, variant)? {
                    ProviderInstance::Store(store) => Ok(store),
                    _ => Err(self.unavailable(Capability::VectorStore, variant)),
                }
            })
            .cloned()
    }

    /// Construct a service from its declared capability dependencies.
    pub fn construct<T: FromRegistry>(&self) -> Result<T, ProviderError> {
        T::construct(self)
    }
}
