use crate::registry::{AgentFilter, AgentRegistry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use swarm_core::{AgentId, AgentType, WorkflowId};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// A group of agents coordinating on one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    /// Member agents, grouped by composition order.
    pub members: Vec<AgentId>,
    /// Agent types the team was formed from.
    pub composition: Vec<AgentType>,
    pub workflow_id: Option<WorkflowId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct TeamManager {
    teams: RwLock<HashMap<Uuid, Team>>,
}

impl TeamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Form a team from every registered agent of the given types.
    ///
    /// Duplicate types collapse to one. A type with no agents is skipped.
    pub async fn form_team(
        &self,
        registry: &AgentRegistry,
        name: impl Into<String>,
        composition: &[AgentType],
        workflow_id: Option<WorkflowId>,
    ) -> Team {
        let mut types = Vec::new();
        for agent_type in composition {
            if !types.contains(agent_type) {
                types.push(*agent_type);
            }
        }

        let mut members = Vec::new();
        for agent_type in &types {
            let agents = registry.list_agents(AgentFilter::by_type(*agent_type)).await;
            if agents.is_empty() {
                warn!(agent_type = %agent_type, "No agents of type for team");
            }
            members.extend(agents.into_iter().map(|a| a.id));
        }

        let team = Team {
            id: Uuid::new_v4(),
            name: name.into(),
            members,
            composition: types,
            workflow_id,
            created_at: Utc::now(),
        };
        info!(team_id = %team.id, name = %team.name, members = team.members.len(), "Team formed");
        self.teams.write().await.insert(team.id, team.clone());
        team
    }

    pub async fn get(&self, team_id: Uuid) -> Option<Team> {
        self.teams.read().await.get(&team_id).cloned()
    }

    pub async fn team_for_workflow(&self, workflow_id: WorkflowId) -> Option<Team> {
        self.teams
            .read()
            .await
            .values()
            .find(|t| t.workflow_id == Some(workflow_id))
            .cloned()
    }

    pub async fn dissolve(&self, team_id: Uuid) -> Option<Team> {
        let team = self.teams.write().await.remove(&team_id);
        if let Some(t) = &team {
            info!(team_id = %t.id, name = %t.name, "Team dissolved");
        }
        team
    }

    pub async fn dissolve_for_workflow(&self, workflow_id: WorkflowId) -> Option<Team> {
        let team_id = self.team_for_workflow(workflow_id).await?.id;
        self.dissolve(team_id).await
    }

    /// Drop a deleted agent from every team.
    pub async fn remove_member(&self, agent_id: AgentId) {
        for team in self.teams.write().await.values_mut() {
            team.members.retain(|m| *m != agent_id);
        }
    }

    pub async fn team_count(&self) -> usize {
        self.teams.read().await.len()
    }
}
