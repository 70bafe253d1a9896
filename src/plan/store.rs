use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::Plan;

/// Persists the active plan between CLI invocations
pub struct PlanStore {
    /// pilot home directory
    home: PathBuf,
}

impl PlanStore {
    /// Create a store rooted at `home`, creating the directory layout if needed
    pub fn new(home: impl Into<PathBuf>) -> Result<Self> {
        let home = home.into();

        if !home.exists() {
            fs::create_dir_all(&home)
                .with_context(|| format!("Failed to create {}", home.display()))?;
        }
        fs::create_dir_all(home.join("logs")).context("Failed to create logs dir")?;

        Ok(Self { home })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// plan.json path
    fn plan_file(&self) -> PathBuf {
        self.home.join("plan.json")
    }

    /// Activity log mirror path
    pub fn activity_file(&self) -> PathBuf {
        self.home.join("logs").join("activity.log")
    }

    /// Load the stored plan, if any
    pub fn load(&self) -> Result<Option<Plan>> {
        let path = self.plan_file();
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).context("Failed to read plan.json")?;
        let plan: Plan = serde_json::from_str(&content).context("Failed to parse plan.json")?;
        Ok(Some(plan))
    }

    /// Replace the stored plan
    pub fn save(&self, plan: &Plan) -> Result<()> {
        let content = serde_json::to_string_pretty(plan).context("Failed to serialize plan")?;
        fs::write(self.plan_file(), content).context("Failed to write plan.json")?;
        Ok(())
    }

    /// Forget the stored plan
    pub fn clear(&self) -> Result<()> {
        let path = self.plan_file();
        if path.exists() {
            fs::remove_file(&path).context("Failed to remove plan.json")?;
        }
        Ok(())
    }
}
