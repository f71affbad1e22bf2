//! `conveyor doctor`: configuration and connectivity checks

use crate::app::{ado_client, load_catalog, open_memory, AppConfig};
use conveyor_core::{BuildService, RepositoryCatalog};
use conveyor_integrations::process;
use std::collections::BTreeMap;
use std::process::ExitCode;
use std::time::Duration;

pub async fn run(config: &AppConfig) -> anyhow::Result<ExitCode> {
    println!("🏥 Conveyor Doctor\n");

    let mut all_ok = true;
    all_ok &= check_config(config);
    all_ok &= check_memory(config).await;
    let catalog = check_repositories(config);
    all_ok &= catalog.is_some();
    all_ok &= check_program("git", &["--version"], true).await;
    if config.maven.enabled {
        let mvn = config
            .maven
            .maven_home
            .as_deref()
            .map(|home| {
                crate::app::config::expand_home(home)
                    .join("bin/mvn")
                    .to_string_lossy()
                    .into_owned()
            })
            .unwrap_or_else(|| "mvn".to_string());
        check_program(&mvn, &["-v"], false).await;
    }
    all_ok &= check_llm(config).await;
    all_ok &= check_ado(config, catalog.as_ref()).await;

    println!();
    if all_ok {
        println!("✅ All checks passed! Ready to run Conveyor.");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("⚠️  Some checks failed. Please fix the issues above.");
        Ok(ExitCode::FAILURE)
    }
}

fn check_config(config: &AppConfig) -> bool {
    print!("Checking configuration... ");
    let problems = config.validate();
    if problems.is_empty() {
        println!("✅ OK");
        true
    } else {
        println!("❌");
        for problem in problems {
            println!("  - {problem}");
        }
        false
    }
}

async fn check_memory(config: &AppConfig) -> bool {
    print!("Checking memory database... ");
    match open_memory(config).await {
        Ok(_) => {
            println!("✅ {}", config.memory_path().display());
            true
        }
        Err(e) => {
            println!("❌ {e:#}");
            false
        }
    }
}

fn check_repositories(config: &AppConfig) -> Option<RepositoryCatalog> {
    print!("Checking repositories... ");
    let catalog = match load_catalog(config) {
        Ok(catalog) => catalog,
        Err(e) => {
            println!("❌ {e:#}");
            return None;
        }
    };
    let problems = catalog.validate();
    if !problems.is_empty() {
        println!("❌");
        for problem in problems {
            println!("  - {problem}");
        }
        return None;
    }
    if catalog.repositories.is_empty() {
        println!(
            "⚠️  none configured in {}",
            config.repositories_path().display()
        );
    } else {
        println!("✅ {} bound", catalog.repositories.len());
    }
    Some(catalog)
}

async fn check_program(program: &str, args: &[&str], required: bool) -> bool {
    print!("Checking {program}... ");
    let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
    match process::run(program, &args, None, &BTreeMap::new(), Duration::from_secs(30)).await {
        Ok(output) if output.success => {
            let version = output.combined();
            println!("✅ {}", version.lines().next().unwrap_or("").trim());
            true
        }
        Ok(output) => {
            println!("❌ exited with {:?}", output.exit_code);
            !required
        }
        Err(e) => {
            let mark = if required { "❌" } else { "⚠️ " };
            println!("{mark} {e}");
            !required
        }
    }
}

async fn check_llm(config: &AppConfig) -> bool {
    print!("Checking reasoning provider ({})... ", config.llm.provider);
    let provider = match conveyor_llm::build_provider(&config.llm) {
        Ok(provider) => provider,
        Err(e) => {
            println!("❌ {e}");
            return false;
        }
    };
    match provider.health_check().await {
        Ok(status) if status.healthy => {
            println!("✅ {}", status.model);
            true
        }
        Ok(status) => {
            println!("❌ {} is not healthy", status.model);
            false
        }
        Err(e) => {
            println!("❌ {e}");
            false
        }
    }
}

async fn check_ado(config: &AppConfig, catalog: Option<&RepositoryCatalog>) -> bool {
    print!("Checking Azure DevOps... ");
    let client = match ado_client(config) {
        Ok(client) => client,
        Err(e) => {
            println!("❌ {e}");
            return false;
        }
    };
    let probe = catalog.and_then(|c| {
        c.enabled()
            .find_map(|r| r.build_definition.clone().map(|d| (d, r.default_branch.clone())))
    });
    let Some((definition, branch)) = probe else {
        println!(
            "⚠️  configured for {}/{}, no build definition to probe",
            config.ado.organization, config.ado.project
        );
        return true;
    };
    match client.latest(&definition, &branch).await {
        Ok(Some(build)) => {
            println!("✅ {definition}: build {} {}", build.id, build.status);
            true
        }
        Ok(None) => {
            println!("✅ {definition}: no builds on {branch} yet");
            true
        }
        Err(e) => {
            println!("❌ {e}");
            false
        }
    }
}
