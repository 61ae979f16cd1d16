//! Non-interactive subcommands over the same services the panel uses.

use std::future::Future;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::debug;

use crate::api::{AdminApi, Item, RowId, UploadFile};
use crate::bulk::{BulkActionController, DeleteOutcome};
use crate::config::{Config, PageConfig};
use crate::import::mapping::FieldTarget;
use crate::import::wizard::ImportWizard;
use crate::import::{self, ImportError};
use crate::items::{ItemActions, ItemOutcome};
use crate::notify::{Dismissal, NotificationCenter};
use crate::refresh::RefreshCoordinator;
use crate::selection::SelectionEvent;
use crate::shared::lock;

/// Everything a subcommand needs
pub struct Services<A> {
    pub config: Config,
    pub api: Arc<A>,
    pub center: NotificationCenter,
    pub refresh: Arc<RefreshCoordinator>,
}

impl<A: AdminApi + 'static> Services<A> {
    pub fn new(config: Config, api: A) -> Self {
        let center = NotificationCenter::new(&config.notifications);
        // No table to re-render here; reload requests go nowhere
        let (refresh, _reloads) = RefreshCoordinator::new(Duration::ZERO);
        Self {
            config,
            api: Arc::new(api),
            center,
            refresh: Arc::new(refresh),
        }
    }

    fn page(&self, key: &str) -> Result<&PageConfig> {
        self.config.page(key).ok_or_else(|| {
            let known: Vec<&str> = self.config.pages.iter().map(|p| p.key.as_str()).collect();
            anyhow!("unknown page `{}` (configured: {})", key, known.join(", "))
        })
    }

    fn items(&self, page_key: &str) -> Result<ItemActions<A>> {
        let page = self.page(page_key)?;
        Ok(ItemActions::new(
            Arc::clone(&self.api),
            self.center.clone(),
            Arc::clone(&self.refresh),
            page,
        ))
    }

    /// Print notifications collected so far to stderr
    pub fn print_notices(&self) {
        for entry in self.center.history() {
            eprintln!("[{}] {}: {}", entry.timestamp(), entry.kind, entry.message);
        }
    }
}

/// Drive `work` to completion, answering its confirmations on the terminal
/// (or with yes when `assume_yes` is set).
pub async fn with_prompt<F: Future>(
    center: &NotificationCenter,
    assume_yes: bool,
    work: F,
) -> F::Output {
    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => return output,
            prompt = center.wait_for_confirm() => {
                let how = if assume_yes {
                    Dismissal::Confirm
                } else {
                    ask(&prompt.message).await
                };
                center.resolve(how);
            }
        }
    }
}

/// `[y/N]` on stderr. EOF closes the dialog, anything but yes cancels it.
async fn ask(message: &str) -> Dismissal {
    eprint!("{} [y/N] ", message);
    let _ = io::stderr().flush();

    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        io::stdin().read_line(&mut line).map(|read| (read, line))
    })
    .await;

    match line {
        Ok(Ok((0, _))) => {
            eprintln!();
            Dismissal::Close
        }
        Ok(Ok((_, line))) => match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Dismissal::Confirm,
            _ => Dismissal::Cancel,
        },
        Ok(Err(err)) => {
            debug!(error = %err, "failed to read answer");
            Dismissal::Close
        }
        Err(err) => {
            debug!(error = %err, "prompt task failed");
            Dismissal::Close
        }
    }
}

/// Parse `FIELD=VALUE`; the value is taken as JSON when it parses, else as text
pub fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got `{}`", raw))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("missing field name in `{}`", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((field.to_string(), value))
}

pub async fn delete<A: AdminApi + 'static>(
    services: &Services<A>,
    page_key: &str,
    ids: &[String],
    assume_yes: bool,
) -> Result<()> {
    let page = services.page(page_key)?;
    let controller = BulkActionController::new(
        Arc::clone(&services.api),
        services.center.clone(),
        Arc::clone(&services.refresh),
        page,
    );
    let mut unique: Vec<RowId> = Vec::with_capacity(ids.len());
    for id in ids.iter().map(|id| RowId::from(id.as_str())) {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    controller.apply(SelectionEvent::RowsReplaced { ids: unique });
    controller.apply(SelectionEvent::ToggledAll { checked: true });

    match with_prompt(&services.center, assume_yes, controller.request_delete()).await {
        DeleteOutcome::Deleted { count } => println!("Deleted {} item(s) from {}.", count, page.title),
        DeleteOutcome::NothingSelected => println!("Nothing to delete."),
        DeleteOutcome::Cancelled => println!("Cancelled."),
        DeleteOutcome::Busy => println!("A delete is already running."),
        DeleteOutcome::Failed(err) => bail!("delete failed: {}", err.user_message()),
    }
    Ok(())
}

pub async fn show<A: AdminApi + 'static>(services: &Services<A>, page_key: &str, id: &str) -> Result<()> {
    let items = services.items(page_key)?;
    match items.get(&RowId::from(id)).await {
        ItemOutcome::Done(item) => {
            let text = serde_json::to_string_pretty(&item).context("failed to format item")?;
            println!("{}", text);
            Ok(())
        }
        ItemOutcome::Failed(err) => bail!("{}", err.user_message()),
        ItemOutcome::Busy | ItemOutcome::Cancelled => Ok(()),
    }
}

pub async fn remove<A: AdminApi + 'static>(
    services: &Services<A>,
    page_key: &str,
    id: &str,
    assume_yes: bool,
) -> Result<()> {
    let items = services.items(page_key)?;
    let id = RowId::from(id);
    match with_prompt(&services.center, assume_yes, items.delete(&id, |_| {})).await {
        ItemOutcome::Done(()) => println!("Deleted #{}.", id),
        ItemOutcome::Cancelled => println!("Cancelled."),
        ItemOutcome::Busy => {}
        ItemOutcome::Failed(err) => bail!("delete failed: {}", err.user_message()),
    }
    Ok(())
}

pub async fn update<A: AdminApi + 'static>(
    services: &Services<A>,
    page_key: &str,
    id: &str,
    assignments: Vec<(String, Value)>,
) -> Result<()> {
    if assignments.is_empty() {
        bail!("nothing to update; pass at least one FIELD=VALUE");
    }
    let items = services.items(page_key)?;
    let fields: Item = assignments.into_iter().collect();
    match items.update(&RowId::from(id), &fields).await {
        ItemOutcome::Done(item) => {
            let text = serde_json::to_string_pretty(&item).context("failed to format item")?;
            println!("{}", text);
            Ok(())
        }
        ItemOutcome::Failed(err) => bail!("update failed: {}", err.user_message()),
        ItemOutcome::Busy | ItemOutcome::Cancelled => Ok(()),
    }
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn import_failure(err: ImportError) -> anyhow::Error {
    match err {
        ImportError::Api(err) => anyhow!(err.user_message()),
        other => anyhow!(other),
    }
}

/// Run the whole wizard with the suggested column mapping
pub async fn import<A: AdminApi + 'static>(
    services: &Services<A>,
    path: &Path,
    campaign_id: Option<&str>,
    assume_yes: bool,
) -> Result<()> {
    let api = services.api.as_ref();
    let center = &services.center;
    let file = UploadFile::from_path(path)?;
    let name = file.name.clone();
    let wizard = Mutex::new(ImportWizard::new(&services.config.import));
    lock(&wizard)
        .select_file(file)
        .map_err(|err| anyhow!("cannot import: {}", err))?;

    let pb = spinner(format!("Analyzing {}...", name));
    let analyzed = import::analyze(&wizard, api, center).await;
    pb.finish_and_clear();
    analyzed.map_err(import_failure)?;

    {
        let wizard = lock(&wizard);
        if let Some(session) = wizard.session() {
            println!("Column mapping:");
            for column in &session.columns {
                let target = session.mapping.get(column);
                if target == FieldTarget::Ignore {
                    println!("  {:<24} (ignored)", column);
                } else {
                    println!("  {:<24} -> {}", column, target);
                }
            }
        }
    }
    lock(&wizard)
        .confirm_mapping()
        .map_err(|err| anyhow!("cannot import: {}; rename the header or use the panel", err))?;

    let pb = spinner("Previewing...".to_string());
    let previewed = import::preview(&wizard, api, center).await;
    pb.finish_and_clear();
    previewed.map_err(import_failure)?;
    print_preview(&wizard);

    if let Some(wanted) = campaign_id {
        import::load_campaigns(&wizard, api, center)
            .await
            .map_err(import_failure)?;
        let mut wizard = lock(&wizard);
        let campaign = wizard
            .campaigns()
            .iter()
            .find(|c| c.id.as_str() == wanted)
            .cloned()
            .ok_or_else(|| anyhow!("unknown campaign `{}`", wanted))?;
        println!("Campaign: {}", campaign.name);
        wizard.select_campaign(Some(campaign))?;
    }

    let question = format!("Import {} into contacts?", name);
    if !with_prompt(center, assume_yes, center.confirm(question)).await {
        println!("Cancelled.");
        return Ok(());
    }

    let pb = spinner(format!("Importing {}...", name));
    let refresh_page = services.config.import.refresh_page.as_deref();
    let executed = import::execute(&wizard, api, center, &services.refresh, refresh_page).await;
    pb.finish_and_clear();
    let summary = executed.map_err(import_failure)?;

    println!(
        "Inserted: {}  Skipped: {}  Failed: {}",
        summary.inserted, summary.skipped, summary.failed
    );
    for error in &summary.errors {
        println!("  {}", error);
    }
    Ok(())
}

fn print_preview(wizard: &Mutex<ImportWizard>) {
    let wizard = lock(wizard);
    let Some(preview) = wizard.session().and_then(|s| s.preview.as_ref()) else {
        return;
    };
    println!("Preview ({} row(s)):", preview.rows.len());
    for row in &preview.rows {
        let fields: Vec<String> = row.fields.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        println!("  {}", fields.join("  "));
        for warning in &row.warnings {
            println!("    ! {}", warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;
    use crate::api::fake::{Call, FakeApi};
    use crate::config;

    fn services() -> Services<FakeApi> {
        let config = config::parse(
            "[api]\nbase_url = \"http://localhost:8000\"\n",
            PathBuf::from("test.toml"),
        )
        .unwrap();
        Services::new(config, FakeApi::default())
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("age=42").unwrap(), ("age".into(), json!(42)));
        assert_eq!(parse_assignment("active=true").unwrap(), ("active".into(), json!(true)));
        assert_eq!(
            parse_assignment("name=Ann Lee").unwrap(),
            ("name".into(), json!("Ann Lee"))
        );
        assert_eq!(parse_assignment("note=a=b").unwrap(), ("note".into(), json!("a=b")));
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[tokio::test]
    async fn test_with_prompt_assumes_yes() {
        let center = NotificationCenter::new(&Default::default());
        let answer = with_prompt(&center, true, center.confirm("Go?")).await;
        assert!(answer);
    }

    #[tokio::test]
    async fn test_with_prompt_passes_through_without_confirm() {
        let center = NotificationCenter::new(&Default::default());
        let value = with_prompt(&center, false, async { 7 }).await;
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_delete_sends_repeated_ids_once() {
        let services = services();
        let ids = vec!["3".to_string(), "7".to_string(), "3".to_string()];
        delete(&services, "users", &ids, true).await.unwrap();

        assert_eq!(
            services.api.calls(),
            vec![Call::BulkDelete {
                endpoint: "/api/users/bulk-delete".into(),
                ids: vec![RowId::from("3"), RowId::from("7")],
            }]
        );
        assert_eq!(services.center.history()[0].message, "Deleted 2 item(s).");
    }
}
