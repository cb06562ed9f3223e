//! S3-based registry backend.
//!
//! One JSON object per instance under a key prefix. Listing walks the
//! `<prefix><cluster>__<namespace>__` key range so a namespace scan never
//! reads another namespace's records.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info, warn};

use crate::error::RegistryError;

use super::store::{sort_instances, AddonRegistry, RegistryResult};
use super::types::{AddonIdentity, AddonInstance, PartialIdentity};

/// S3-based addon registry.
#[derive(Debug, Clone)]
pub struct S3AddonRegistry {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix, empty or ending in `/`.
    prefix: String,
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        })
        .unwrap_or_default()
}

impl S3AddonRegistry {
    /// Creates a new S3 registry using the ambient AWS configuration.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a new S3 registry with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    fn key(&self, identity: &AddonIdentity) -> String {
        format!("{}{}.json", self.prefix, identity.storage_key())
    }

    fn scan_prefix(&self, filter: &PartialIdentity) -> String {
        format!("{}{}__{}__", self.prefix, filter.cluster_id, filter.namespace)
    }

    /// Gets an object from S3.
    async fn get_object(&self, key: &str) -> RegistryResult<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response.body.collect().await.map_err(|e| {
                    RegistryError::unavailable(format!("Failed to read S3 object: {e}"))
                })?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    RegistryError::corrupted(format!("Invalid UTF-8 in S3 object: {e}"))
                })?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(RegistryError::unavailable(format!("S3 get error: {service_err}")))
                }
            }
        }
    }

    /// Puts an object to S3.
    async fn put_object(&self, key: &str, content: String) -> RegistryResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.into_bytes().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| RegistryError::unavailable(format!("S3 put error: {e}")))?;

        Ok(())
    }

    /// Checks if an object exists in S3.
    async fn object_exists(&self, key: &str) -> RegistryResult<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(RegistryError::unavailable(format!("S3 head error: {service_err}")))
                }
            }
        }
    }

    fn serialize(instance: &AddonInstance) -> RegistryResult<String> {
        serde_json::to_string_pretty(instance)
            .map_err(|e| RegistryError::serialization(format!("Failed to serialize record: {e}")))
    }

    fn parse(key: &str, content: &str) -> RegistryResult<AddonInstance> {
        serde_json::from_str(content)
            .map_err(|e| RegistryError::corrupted(format!("Failed to parse {key}: {e}")))
    }
}

#[async_trait]
impl AddonRegistry for S3AddonRegistry {
    async fn exists(&self, identity: &AddonIdentity) -> RegistryResult<bool> {
        self.object_exists(&self.key(identity)).await
    }

    async fn store(&self, instance: &AddonInstance) -> RegistryResult<()> {
        let key = self.key(&instance.identity);
        let content = Self::serialize(instance)?;

        // Conditional write: the put is rejected if the key already exists
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .if_none_match("*")
            .body(content.into_bytes().into())
            .content_type("application/json")
            .send()
            .await;

        match result {
            Ok(_) => {
                info!("Stored record at s3://{}/{key}", self.bucket);
                Ok(())
            }
            Err(sdk_err) => {
                let status = sdk_err.raw_response().map(|r| r.status().as_u16());
                if status == Some(412) {
                    Err(RegistryError::Conflict {
                        identity: instance.identity.to_string(),
                    })
                } else {
                    Err(RegistryError::unavailable(format!("S3 put error: {sdk_err}")))
                }
            }
        }
    }

    async fn get(&self, identity: &AddonIdentity) -> RegistryResult<AddonInstance> {
        let key = self.key(identity);
        debug!("Loading record from s3://{}/{key}", self.bucket);

        let content = self.get_object(&key).await?.ok_or_else(|| RegistryError::NotFound {
            identity: identity.to_string(),
        })?;
        Self::parse(&key, &content)
    }

    async fn update(&self, instance: &AddonInstance) -> RegistryResult<()> {
        let key = self.key(&instance.identity);
        if !self.object_exists(&key).await? {
            return Err(RegistryError::NotFound {
                identity: instance.identity.to_string(),
            });
        }

        self.put_object(&key, Self::serialize(instance)?).await?;
        debug!("Updated record at s3://{}/{key}", self.bucket);
        Ok(())
    }

    async fn delete(&self, identity: &AddonIdentity) -> RegistryResult<()> {
        let key = self.key(identity);
        if !self.object_exists(&key).await? {
            return Err(RegistryError::NotFound {
                identity: identity.to_string(),
            });
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| RegistryError::unavailable(format!("S3 delete error: {e}")))?;

        info!("Deleted record at s3://{}/{key}", self.bucket);
        Ok(())
    }

    async fn list(&self, filter: &PartialIdentity) -> RegistryResult<Vec<AddonInstance>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.scan_prefix(filter))
            .into_paginator()
            .send();

        let mut instances = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| RegistryError::unavailable(format!("S3 list error: {e}")))?;

            for object in page.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                let Some(content) = self.get_object(key).await? else {
                    continue;
                };
                match Self::parse(key, &content) {
                    Ok(instance) if filter.matches(&instance.identity) => instances.push(instance),
                    Ok(_) => {}
                    Err(e) => warn!("Skipping record: {e}"),
                }
            }
        }

        sort_instances(&mut instances);
        Ok(instances)
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
