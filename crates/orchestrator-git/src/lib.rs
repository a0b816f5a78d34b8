//! `workspace.worktree`: one git worktree per session, created from the
//! project's local checkout.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_config::OrchestratorConfig;
use orchestrator_protocol::command::{command_output_detail, render_args, run_blocking, spawn_error};
use orchestrator_protocol::{
    CommandRunner, OrchestratorError, OrchestratorResult, PluginSlot, ProcessCommandRunner,
    ProjectContext, Workspace, WorkspaceInfo, WorkspaceRequest,
};
use orchestrator_registry::{PluginInstance, PluginManifest, PluginModule};
use tracing::{debug, info};

pub struct GitWorktreeWorkspace {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    worktrees_root: PathBuf,
}

impl GitWorktreeWorkspace {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        binary: impl Into<String>,
        worktrees_root: impl Into<PathBuf>,
    ) -> OrchestratorResult<Self> {
        let binary = binary.into();
        if binary.trim().is_empty() {
            return Err(OrchestratorError::Configuration(
                "git.binary is empty. Provide a valid git binary path.".to_owned(),
            ));
        }

        Ok(Self {
            runner,
            binary,
            worktrees_root: worktrees_root.into(),
        })
    }

    /// `<worktrees_root>/<project>/<session>`.
    pub fn worktree_path(&self, project: &ProjectContext, request: &WorkspaceRequest) -> PathBuf {
        self.worktrees_root
            .join(project.id.as_str())
            .join(request.session_id.as_str())
    }

    fn branch_exists_args(repository_root: &Path, branch: &str) -> Vec<OsString> {
        vec![
            OsString::from("-C"),
            repository_root.as_os_str().to_owned(),
            OsString::from("rev-parse"),
            OsString::from("--verify"),
            OsString::from("--quiet"),
            OsString::from(format!("refs/heads/{branch}")),
        ]
    }

    fn create_worktree_args(
        repository_root: &Path,
        worktree_path: &Path,
        branch: &str,
        base_branch: Option<&str>,
    ) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-C"),
            repository_root.as_os_str().to_owned(),
            OsString::from("worktree"),
            OsString::from("add"),
        ];
        match base_branch {
            Some(base_branch) => {
                args.push(OsString::from("-b"));
                args.push(OsString::from(branch));
                args.push(worktree_path.as_os_str().to_owned());
                args.push(OsString::from(base_branch));
            }
            None => {
                args.push(worktree_path.as_os_str().to_owned());
                args.push(OsString::from(branch));
            }
        }
        args
    }

    fn remove_worktree_args(repository_root: &Path, worktree_path: &Path) -> Vec<OsString> {
        vec![
            OsString::from("-C"),
            repository_root.as_os_str().to_owned(),
            OsString::from("worktree"),
            OsString::from("remove"),
            OsString::from("--force"),
            worktree_path.as_os_str().to_owned(),
        ]
    }

    fn prune_worktrees_args(repository_root: &Path) -> Vec<OsString> {
        vec![
            OsString::from("-C"),
            repository_root.as_os_str().to_owned(),
            OsString::from("worktree"),
            OsString::from("prune"),
        ]
    }

    async fn run_git_raw(&self, args: Vec<OsString>) -> OrchestratorResult<Output> {
        debug!(binary = %self.binary, args = %render_args(&args), "running git");
        run_blocking(self.runner.clone(), self.binary.clone(), args, None)
            .await
            .map_err(|error| {
                spawn_error(
                    &self.binary,
                    &error,
                    "Install Git or set git.binary to a valid binary path.",
                )
            })
    }

    async fn run_git(&self, args: Vec<OsString>) -> OrchestratorResult<Output> {
        let output = self.run_git_raw(args.clone()).await?;
        if output.status.success() {
            return Ok(output);
        }

        Err(OrchestratorError::Workspace(format!(
            "Git command failed (`{} {}`): {}",
            self.binary,
            render_args(&args),
            command_output_detail(&output)
        )))
    }
}

#[async_trait]
impl Workspace for GitWorktreeWorkspace {
    async fn create(
        &self,
        project: &ProjectContext,
        request: &WorkspaceRequest,
    ) -> OrchestratorResult<WorkspaceInfo> {
        validate_branch_name(&request.branch)?;
        ensure_repo_root_available(&project.path)?;
        let worktree_path = self.worktree_path(project, request);
        if worktree_path.exists() {
            return Err(OrchestratorError::Workspace(format!(
                "worktree path '{}' already exists",
                worktree_path.display()
            )));
        }
        ensure_worktree_parent_exists(&worktree_path)?;

        // Reuse a branch left behind by an earlier session for the same issue.
        let existing = self
            .run_git_raw(Self::branch_exists_args(&project.path, &request.branch))
            .await?
            .status
            .success();
        let base_branch = (!existing).then_some(project.default_branch.as_str());
        self.run_git(Self::create_worktree_args(
            &project.path,
            &worktree_path,
            &request.branch,
            base_branch,
        ))
        .await?;

        info!(
            session_id = %request.session_id,
            path = %worktree_path.display(),
            branch = %request.branch,
            reused_branch = existing,
            "created worktree"
        );
        Ok(WorkspaceInfo {
            path: worktree_path,
            branch: request.branch.clone(),
        })
    }

    /// Removing a worktree that is already gone only prunes git's bookkeeping.
    async fn destroy(
        &self,
        project: &ProjectContext,
        workspace: &WorkspaceInfo,
    ) -> OrchestratorResult<()> {
        validate_directory_cleanup_target(&project.path, &workspace.path)?;
        if !workspace.path.exists() {
            self.run_git(Self::prune_worktrees_args(&project.path)).await?;
            return Ok(());
        }

        self.run_git(Self::remove_worktree_args(&project.path, &workspace.path))
            .await?;
        info!(path = %workspace.path.display(), "removed worktree");
        Ok(())
    }
}

fn validate_branch_name(branch: &str) -> OrchestratorResult<()> {
    let invalid = branch.trim().is_empty()
        || branch.starts_with('-')
        || branch.starts_with('/')
        || branch.ends_with('/')
        || branch.ends_with(".lock")
        || branch.contains("..")
        || branch.contains("@{")
        || branch
            .chars()
            .any(|ch| ch.is_whitespace() || ch.is_control() || "~^:?*[\\".contains(ch));
    if invalid {
        return Err(OrchestratorError::Workspace(format!(
            "'{branch}' is not a valid branch name"
        )));
    }
    Ok(())
}

fn ensure_repo_root_available(root: &Path) -> OrchestratorResult<()> {
    if root.as_os_str().is_empty() {
        return Err(OrchestratorError::Configuration(
            "Cannot create worktree: project path is empty.".to_owned(),
        ));
    }
    if !root.is_dir() {
        return Err(OrchestratorError::Workspace(format!(
            "Cannot create worktree: project path '{}' is not a directory.",
            root.display()
        )));
    }

    Ok(())
}

fn ensure_worktree_parent_exists(worktree_path: &Path) -> OrchestratorResult<()> {
    let parent = worktree_path.parent().ok_or_else(|| {
        OrchestratorError::Workspace(format!(
            "Worktree path '{}' has no parent directory.",
            worktree_path.display()
        ))
    })?;

    fs::create_dir_all(parent).map_err(|error| {
        OrchestratorError::Workspace(format!(
            "Failed to create parent directory '{}' for worktree: {error}",
            parent.display()
        ))
    })
}

fn validate_directory_cleanup_target(
    repository_root: &Path,
    worktree_path: &Path,
) -> OrchestratorResult<()> {
    if worktree_path.parent().is_none() {
        return Err(OrchestratorError::Workspace(format!(
            "Refusing to remove worktree path '{}' because it points to a filesystem root.",
            worktree_path.display()
        )));
    }

    let same = repository_root == worktree_path
        || matches!(
            (fs::canonicalize(repository_root), fs::canonicalize(worktree_path)),
            (Ok(root), Ok(path)) if root == path
        );
    if same {
        return Err(OrchestratorError::Workspace(format!(
            "Refusing to remove repository root '{}' as a worktree.",
            repository_root.display()
        )));
    }

    Ok(())
}

pub struct GitWorktreeModule;

impl PluginModule for GitWorktreeModule {
    fn manifest(&self) -> PluginManifest {
        PluginManifest {
            slot: PluginSlot::Workspace,
            name: "worktree",
            description: "git worktree per session under the store root",
        }
    }

    fn create(&self, config: &OrchestratorConfig) -> OrchestratorResult<PluginInstance> {
        let worktrees_root = Path::new(&config.store_root).join(&config.git.worktree_dir_name);
        Ok(PluginInstance::Workspace(Arc::new(GitWorktreeWorkspace::new(
            Arc::new(ProcessCommandRunner),
            config.git.binary.clone(),
            worktrees_root,
        )?)))
    }
}
