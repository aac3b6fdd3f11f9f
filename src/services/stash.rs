use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Scene;

/// Every scene field the organize pipeline reads
pub const SCENE_FRAGMENT: &str = r#"
    id
    title
    code
    details
    director
    urls
    date
    rating100
    organized
    files {
        id
        path
        size
        duration
        video_codec
        audio_codec
        width
        height
        frame_rate
        bit_rate
    }
    paths {
        screenshot
        preview
        stream
        webp
    }
    studio {
        id
        name
        image_path
    }
    groups {
        group {
            id
            name
        }
        scene_index
    }
    tags {
        id
        name
    }
    performers {
        id
        name
        disambiguation
        gender
        favorite
        image_path
        birthdate
        country
        height_cm
        measurements
    }
    stash_ids {
        endpoint
        stash_id
    }
"#;

/// GraphQL client for the media server
pub struct StashClient {
    client: Client,
    graphql_url: String,
}

/// GraphQL request wrapper
#[derive(Debug, Serialize)]
struct GraphQLRequest<'a> {
    query: &'a str,
    variables: Value,
}

#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct FindScenesData {
    #[serde(rename = "findScenes")]
    find_scenes: FindScenesResult,
}

#[derive(Debug, Deserialize)]
struct FindScenesResult {
    #[serde(default)]
    scenes: Vec<Scene>,
}

#[derive(Debug, Deserialize)]
struct FindSceneData {
    #[serde(rename = "findScene")]
    find_scene: Option<Scene>,
}

#[derive(Debug, Deserialize)]
struct ConfigurationData {
    configuration: ConfigurationResult,
}

#[derive(Debug, Deserialize)]
struct ConfigurationResult {
    #[serde(default)]
    plugins: Value,
}

impl StashClient {
    /// `client` should already carry the auth headers (see `http::authenticated_client`)
    pub fn new(client: Client, graphql_url: impl Into<String>) -> Self {
        Self {
            client,
            graphql_url: graphql_url.into(),
        }
    }

    async fn call<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let request = GraphQLRequest { query, variables };

        let response = self
            .client
            .post(&self.graphql_url)
            .json(&request)
            .send()
            .await
            .context("Failed to reach media server GraphQL endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("GraphQL request failed: {} - {}", status, text);
        }

        let body: GraphQLResponse<T> = response
            .json()
            .await
            .context("Failed to parse GraphQL response")?;

        if let Some(errors) = body.errors.filter(|e| !e.is_empty()) {
            let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
            anyhow::bail!("GraphQL error: {}", messages.join("; "));
        }

        body.data.context("GraphQL response carried no data")
    }

    /// Settings map stored for `plugin_id`, if the server has any
    pub async fn plugin_settings(&self, plugin_id: &str) -> Result<Option<Value>> {
        let data: ConfigurationData = self
            .call("query Configuration { configuration { plugins } }", Value::Null)
            .await?;

        Ok(data
            .configuration
            .plugins
            .get(plugin_id)
            .filter(|v| v.is_object())
            .cloned())
    }

    /// One page of the full scene collection (1-based page index)
    pub async fn find_scenes_page(&self, page: u32, per_page: u32) -> Result<Vec<Scene>> {
        let query = format!(
            "query FindScenes($filter: FindFilterType) {{ findScenes(filter: $filter) {{ scenes {{ {} }} }} }}",
            SCENE_FRAGMENT
        );
        let variables = serde_json::json!({
            "filter": { "page": page, "per_page": per_page }
        });

        let data: FindScenesData = self.call(&query, variables).await?;
        Ok(data.find_scenes.scenes)
    }

    pub async fn find_scene(&self, id: &str) -> Result<Option<Scene>> {
        let query = format!(
            "query FindScene($id: ID!) {{ findScene(id: $id) {{ {} }} }}",
            SCENE_FRAGMENT
        );
        let data: FindSceneData = self.call(&query, serde_json::json!({ "id": id })).await?;
        Ok(data.find_scene)
    }

    /// Scenes whose path includes `path`, optionally filtered by organized flag
    pub async fn find_scenes_in_path(
        &self,
        path: &str,
        organized: Option<bool>,
    ) -> Result<Vec<Scene>> {
        let query = format!(
            "query FindScenesInPath($scene_filter: SceneFilterType, $filter: FindFilterType) {{ \
             findScenes(scene_filter: $scene_filter, filter: $filter) {{ scenes {{ {} }} }} }}",
            SCENE_FRAGMENT
        );

        let mut scene_filter = serde_json::json!({
            "path": { "value": path, "modifier": "INCLUDES" }
        });
        if let Some(flag) = organized {
            scene_filter["organized"] = Value::Bool(flag);
        }
        let variables = serde_json::json!({
            "scene_filter": scene_filter,
            "filter": { "per_page": -1 }
        });

        let data: FindScenesData = self.call(&query, variables).await?;
        Ok(data.find_scenes.scenes)
    }

    /// Trigger a library scan; returns the job id
    pub async fn metadata_scan(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "metadataScan")]
            job_id: Value,
        }

        let data: Data = self
            .call("mutation MetadataScan { metadataScan(input: {}) }", Value::Null)
            .await?;
        tracing::info!("Triggered library scan (job {})", data.job_id);
        Ok(data.job_id.to_string())
    }

    /// Queue identification of one scene using the server's default identify sources
    pub async fn identify_scene(&self, id: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "metadataIdentify")]
            job_id: Value,
        }

        let data: Data = self
            .call(
                "mutation Identify($ids: [ID!]) { metadataIdentify(input: { sources: [], sceneIDs: $ids }) }",
                serde_json::json!({ "ids": [id] }),
            )
            .await?;
        tracing::info!("Queued identify for scene {} (job {})", id, data.job_id);
        Ok(data.job_id.to_string())
    }

    pub async fn update_scene_organized(&self, id: &str, organized: bool) -> Result<()> {
        let _: Value = self
            .call(
                "mutation SceneUpdate($id: ID!, $organized: Boolean) { sceneUpdate(input: { id: $id, organized: $organized }) { id } }",
                serde_json::json!({ "id": id, "organized": organized }),
            )
            .await?;
        tracing::debug!("Scene {} organized={}", id, organized);
        Ok(())
    }
}
