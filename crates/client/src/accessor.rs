use std::sync::Arc;

use serde_json::Value;
use shake_core::{EntityIdSerializer, JsonEntityIdSerializer, ShakeResult};
use shake_store::{CacheSweeper, EntityStore, OperationStore};
use tracing::info;

use crate::builder::{JsonResultBuilder, OperationResultBuilder, ResultDataBuilder};
use crate::config::ShakeConfig;
use crate::executor::OperationExecutor;
use crate::patcher::{JsonResultPatcher, PatcherFactory};
use crate::transport::Connection;

/// Composition root of one client: the stores, the active cache policy and
/// the id serializer, plus factories for executors bound to them.
///
/// Must be created inside a Tokio runtime.
pub struct StoreAccessor {
    config: ShakeConfig,
    entity_store: Arc<EntityStore>,
    operation_store: Arc<OperationStore>,
    id_serializer: Arc<dyn EntityIdSerializer>,
    sweeper: CacheSweeper,
}

impl StoreAccessor {
    pub fn new(config: ShakeConfig, id_serializer: Arc<dyn EntityIdSerializer>) -> ShakeResult<Self> {
        let entity_store = Arc::new(EntityStore::new());
        let operation_store = Arc::new(OperationStore::new(Arc::clone(&entity_store))?);
        let sweeper = config.cache_policy().attach(&operation_store)?;
        info!(strategy = %config.execution_strategy, policy = ?sweeper.policy(), "store accessor ready");
        Ok(Self { config, entity_store, operation_store, id_serializer, sweeper })
    }

    /// Accessor with the JSON id serializer.
    pub fn from_config(config: ShakeConfig) -> ShakeResult<Self> {
        Self::new(config, Arc::new(JsonEntityIdSerializer::default()))
    }

    pub fn config(&self) -> &ShakeConfig {
        &self.config
    }

    pub fn entity_store(&self) -> &Arc<EntityStore> {
        &self.entity_store
    }

    pub fn operation_store(&self) -> &Arc<OperationStore> {
        &self.operation_store
    }

    pub fn id_serializer(&self) -> &Arc<dyn EntityIdSerializer> {
        &self.id_serializer
    }

    pub fn sweeper(&self) -> &CacheSweeper {
        &self.sweeper
    }

    /// Executor over any body type, using the configured strategy.
    pub fn executor<B, T>(
        &self,
        connection: Arc<dyn Connection<B>>,
        result_builder: Arc<dyn OperationResultBuilder<B, T>>,
        result_patcher: PatcherFactory<B>,
    ) -> OperationExecutor<B, T>
    where
        B: Send + 'static,
        T: Send + Sync + 'static,
    {
        OperationExecutor::new(
            connection,
            result_builder,
            result_patcher,
            Arc::clone(&self.operation_store),
            self.config.execution_strategy,
        )
    }

    /// Executor for GraphQL JSON: [`JsonResultBuilder`] over this accessor's
    /// entity store and [`JsonResultPatcher`] for incremental payloads.
    pub fn json_executor<T>(
        &self,
        connection: Arc<dyn Connection<Value>>,
        data_builder: Arc<dyn ResultDataBuilder<T>>,
    ) -> OperationExecutor<Value, T>
    where
        T: Send + Sync + 'static,
    {
        let builder: Arc<dyn OperationResultBuilder<Value, T>> =
            Arc::new(JsonResultBuilder::new(Arc::clone(&self.entity_store), data_builder));
        self.executor(connection, builder, JsonResultPatcher::factory())
    }
}
