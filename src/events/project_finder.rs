//! Maps the files modified in a pull request to the set of Terraform
//! projects that need a plan.

use std::collections::HashSet;
use std::path::Path;

use crate::models::Project;

/// Substrings that disqualify a modified file from triggering a plan.
/// State files are tool output, and module directories are planned through
/// the projects that reference them.
const EXCLUSION_LIST: &[&str] = &[
    "terraform.tfstate",
    "terraform.tfstate.backup",
    "_modules",
    "modules",
];

/// Returns the projects modified by `modified_files`, deduplicated, in
/// order of first appearance.
pub fn modified_projects(repo_full_name: &str, modified_files: &[String]) -> Vec<Project> {
    let mut seen = HashSet::new();
    let mut projects = Vec::new();
    for file in filter_to_terraform(modified_files) {
        let path = project_path(&file);
        if seen.insert(path.clone()) {
            projects.push(Project::new(repo_full_name, path));
        }
    }
    projects
}

/// Keep only `.tf`-related files outside the exclusion list.
pub fn filter_to_terraform(files: &[String]) -> Vec<String> {
    files
        .iter()
        .filter(|f| !is_excluded(f) && f.contains(".tf"))
        .cloned()
        .collect()
}

fn is_excluded(file: &str) -> bool {
    EXCLUSION_LIST.iter().any(|e| file.contains(e))
}

/// Project directory for a modified file, relative to the repo root.
/// Files under an `env/` directory belong to the project one level up
/// (that's where `env/<workspace>.tfvars` files live). A file at the repo
/// root yields `"."`.
fn project_path(modified_file: &str) -> String {
    let dir = parent(modified_file);
    if Path::new(&dir)
        .file_name()
        .map(|base| base == "env")
        .unwrap_or(false)
    {
        return parent(&dir);
    }
    dir
}

fn parent(path: &str) -> String {
    match Path::new(path).parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().into_owned(),
        _ => ".".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn filters_out_non_terraform_and_excluded_files() {
        let input = files(&[
            "svc/main.tf",
            "README.md",
            "svc/terraform.tfstate",
            "svc/terraform.tfstate.backup",
            "_modules/vpc/main.tf",
            "modules/db/main.tf",
            "env/staging.tfvars",
        ]);
        assert_eq!(
            filter_to_terraform(&input),
            files(&["svc/main.tf", "env/staging.tfvars"])
        );
    }

    #[test]
    fn dedupes_preserving_first_appearance_order() {
        let input = files(&["b/main.tf", "a/main.tf", "b/outputs.tf"]);
        let projects = modified_projects("owner/repo", &input);
        let paths: Vec<&str> = projects.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["b", "a"]);
    }

    #[test]
    fn env_directory_maps_to_parent_project() {
        let input = files(&["svc/env/staging.tfvars"]);
        let projects = modified_projects("owner/repo", &input);
        assert_eq!(projects[0].path, "svc");
    }

    #[test]
    fn env_directory_at_root_maps_to_root() {
        let input = files(&["env/staging.tfvars"]);
        let projects = modified_projects("owner/repo", &input);
        assert_eq!(projects[0].path, ".");
    }

    #[test]
    fn root_file_yields_dot() {
        let input = files(&["main.tf"]);
        let projects = modified_projects("owner/repo", &input);
        assert_eq!(projects[0].path, ".");
    }
}
