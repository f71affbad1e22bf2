//! `conveyor repos`

use crate::app::{load_catalog, AppConfig};
use anyhow::Result;
use clap::Subcommand;
use conveyor_core::RepositoryCatalog;
use std::process::ExitCode;

#[derive(Subcommand, Debug)]
pub enum ReposCommand {
    /// List repository bindings and component groups
    List,
    /// Check the repository file for problems
    Validate,
    /// Print a starter repository file
    Example,
}

pub fn run(config: &AppConfig, command: ReposCommand) -> Result<ExitCode> {
    match command {
        ReposCommand::Example => {
            print!("{}", RepositoryCatalog::example_yaml());
            Ok(ExitCode::SUCCESS)
        }
        ReposCommand::List => {
            let catalog = load_catalog(config)?;
            print!("{}", render(&catalog));
            Ok(ExitCode::SUCCESS)
        }
        ReposCommand::Validate => {
            let catalog = load_catalog(config)?;
            let problems = catalog.validate();
            if problems.is_empty() {
                println!(
                    "✅ {} repositories, {} component groups",
                    catalog.repositories.len(),
                    catalog.component_groups.len()
                );
                Ok(ExitCode::SUCCESS)
            } else {
                for problem in &problems {
                    println!("❌ {problem}");
                }
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn render(catalog: &RepositoryCatalog) -> String {
    if catalog.repositories.is_empty() {
        return "No repositories configured. Run `conveyor repos example` for a starter file.\n"
            .to_string();
    }
    let mut out = String::new();
    for repo in &catalog.repositories {
        let state = if repo.enabled { "" } else { " (disabled)" };
        let build = repo.build_definition.as_deref().unwrap_or("-");
        out.push_str(&format!(
            "{}{state}\n  url:   {}\n  build: {build}\n  base:  {}\n",
            repo.name, repo.url, repo.default_branch
        ));
    }
    if !catalog.component_groups.is_empty() {
        out.push_str("\ncomponent groups:\n");
        for (group, members) in &catalog.component_groups {
            out.push_str(&format!("  {group}: {}\n", members.join(", ")));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::RepositoryBinding;

    #[test]
    fn test_render_lists_bindings_and_groups() {
        let mut legacy = RepositoryBinding::new("legacy", "https://example.com/legacy.git");
        legacy.enabled = false;
        let catalog = RepositoryCatalog::new(vec![
            RepositoryBinding::new("backend", "https://example.com/backend.git")
                .with_build_definition("backend-ci"),
            legacy,
        ])
        .with_group("core", &["backend"]);

        let text = render(&catalog);
        assert!(text.contains("backend\n  url:   https://example.com/backend.git\n  build: backend-ci"));
        assert!(text.contains("legacy (disabled)"));
        assert!(text.contains("  core: backend"));
    }

    #[test]
    fn test_render_empty_catalog() {
        assert!(render(&RepositoryCatalog::default()).contains("repos example"));
    }
}
