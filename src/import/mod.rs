//! Contact import: column mapping, the wizard state machine and the async
//! steps that move it forward.

pub mod mapping;
pub mod wizard;

use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info};

use crate::api::{AdminApi, ImportSummary};
use crate::error::ApiError;
use crate::notify::NotificationCenter;
use crate::refresh::RefreshCoordinator;
use crate::shared::lock;
use wizard::{ImportWizard, WizardError};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Wizard(#[from] WizardError),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// The wizard moved on while the request was running
    #[error("request abandoned")]
    Abandoned,
}

/// Report a rejected `begin_*`. A repeated import request is dropped silently.
fn rejected(center: &NotificationCenter, err: WizardError) -> ImportError {
    match err {
        WizardError::AlreadyImporting | WizardError::Busy => debug!(%err, "ignored"),
        _ => {
            center.warning(capitalize(&err.to_string()));
        }
    }
    ImportError::Wizard(err)
}

fn failed(center: &NotificationCenter, err: ApiError) -> ImportError {
    center.error(err.user_message());
    ImportError::Api(err)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Apply a synchronous wizard step, reporting a refusal to the user
pub fn step(
    wizard: &Mutex<ImportWizard>,
    center: &NotificationCenter,
    action: impl FnOnce(&mut ImportWizard) -> Result<(), WizardError>,
) -> Result<(), ImportError> {
    let result = action(&mut lock(wizard));
    result.map_err(|err| rejected(center, err))
}

/// Upload the selected file and detect its columns
pub async fn analyze<A: AdminApi>(
    wizard: &Mutex<ImportWizard>,
    api: &A,
    center: &NotificationCenter,
) -> Result<usize, ImportError> {
    let begun = lock(wizard).begin_analyze();
    let (ticket, file) = begun.map_err(|err| rejected(center, err))?;

    info!(file = %file.name, bytes = file.bytes.len(), "analyzing import file");
    let result = api.analyze_import(&file).await;

    let finished = lock(wizard).finish_analyze(ticket, result);
    match finished {
        Ok(Some(columns)) => {
            center.info(format!("Detected {} column(s) in {}.", columns, file.name));
            Ok(columns)
        }
        Ok(None) => Err(ImportError::Abandoned),
        Err(err) => Err(failed(center, err)),
    }
}

/// Dry-run the confirmed mapping
pub async fn preview<A: AdminApi>(
    wizard: &Mutex<ImportWizard>,
    api: &A,
    center: &NotificationCenter,
) -> Result<usize, ImportError> {
    let begun = lock(wizard).begin_preview();
    let (ticket, request) = begun.map_err(|err| rejected(center, err))?;

    let result = api.preview_import(&request).await;

    let finished = lock(wizard).finish_preview(ticket, result);
    match finished {
        Ok(Some(rows)) => Ok(rows),
        Ok(None) => Err(ImportError::Abandoned),
        Err(err) => Err(failed(center, err)),
    }
}

/// Run the import, then refresh the page listing the imported contacts
pub async fn execute<A: AdminApi>(
    wizard: &Mutex<ImportWizard>,
    api: &A,
    center: &NotificationCenter,
    refresh: &RefreshCoordinator,
    refresh_page: Option<&str>,
) -> Result<ImportSummary, ImportError> {
    let begun = lock(wizard).begin_import();
    let (ticket, request) = begun.map_err(|err| rejected(center, err))?;

    info!(session = %request.session_id, campaign = ?request.campaign_id, "starting import");
    let result = api.execute_import(&request).await;

    let finished = lock(wizard).finish_import(ticket, result);
    match finished {
        Ok(Some(summary)) => {
            let message = format!(
                "Import finished: {} inserted, {} skipped, {} failed.",
                summary.inserted, summary.skipped, summary.failed
            );
            if summary.failed > 0 {
                center.warning(message);
            } else {
                center.success(message);
            }
            refresh.after_mutation(refresh_page).await;
            Ok(summary)
        }
        Ok(None) => Err(ImportError::Abandoned),
        Err(err) => Err(failed(center, err)),
    }
}

/// Fetch the campaigns offered in the campaign step
pub async fn load_campaigns<A: AdminApi>(
    wizard: &Mutex<ImportWizard>,
    api: &A,
    center: &NotificationCenter,
) -> Result<usize, ImportError> {
    let campaigns = api
        .list_campaigns()
        .await
        .map_err(|err| failed(center, err))?;
    let count = campaigns.len();
    lock(wizard).set_campaigns(campaigns);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::api::fake::{Call, FakeApi};
    use crate::api::{AnalyzeResponse, Campaign, PreviewResponse, RowId, UploadFile};
    use crate::config::{ImportConfig, NotificationConfig};
    use crate::notify::NoticeKind;
    use mapping::FieldTarget;
    use crate::refresh::{RefreshError, Refresher};
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wizard::Stage;

    fn setup(api: FakeApi) -> (Arc<FakeApi>, NotificationCenter, Arc<Mutex<ImportWizard>>) {
        *lock(&api.analyze) = Ok(AnalyzeResponse {
            columns: vec!["Email".into(), "Company".into()],
            sample: vec![vec!["a@example.com".into(), "Acme".into()]],
        });
        let wizard = ImportWizard::new(&ImportConfig::default());
        let center = NotificationCenter::new(&NotificationConfig::default());
        (Arc::new(api), center, Arc::new(Mutex::new(wizard)))
    }

    fn choose_file(wizard: &Mutex<ImportWizard>) {
        lock(wizard)
            .select_file(UploadFile::new("leads.csv", "Email,Company\n"))
            .unwrap();
    }

    #[tokio::test]
    async fn test_happy_path_refreshes_contacts() {
        let (api, center, wizard) = setup(FakeApi::default());
        let (refresh, mut reloads) = RefreshCoordinator::new(Duration::ZERO);
        choose_file(&wizard);

        assert_eq!(analyze(&wizard, api.as_ref(), &center).await.unwrap(), 2);
        lock(&wizard).confirm_mapping().unwrap();
        preview(&wizard, api.as_ref(), &center).await.unwrap();
        assert_eq!(lock(&wizard).stage(), Stage::Previewed);

        let summary = execute(&wizard, api.as_ref(), &center, &refresh, Some("contacts"))
            .await
            .unwrap();
        assert_eq!(summary.inserted, 0);
        assert_eq!(lock(&wizard).stage(), Stage::Done);
        assert_eq!(center.history().last().unwrap().kind, NoticeKind::Success);
        // Nothing registered for contacts, so the front end is asked to reload
        assert!(reloads.try_recv().is_ok());

        assert_eq!(
            api.calls(),
            vec![
                Call::Analyze("leads.csv".into()),
                Call::Preview(5),
                Call::Execute { campaign_id: None },
            ]
        );
    }

    #[tokio::test]
    async fn test_analyze_failure_is_reported() {
        let (api, center, wizard) = setup(FakeApi::default());
        *lock(&api.analyze) = Err(ApiError::Timeout);
        choose_file(&wizard);

        let err = analyze(&wizard, api.as_ref(), &center).await.unwrap_err();
        assert!(matches!(err, ImportError::Api(ApiError::Timeout)));
        assert_eq!(lock(&wizard).stage(), Stage::Upload);
        assert_eq!(center.history()[0].kind, NoticeKind::Error);
    }

    #[tokio::test]
    async fn test_no_detected_columns_is_an_error() {
        let (api, center, wizard) = setup(FakeApi::default());
        *lock(&api.analyze) = Ok(AnalyzeResponse::default());
        choose_file(&wizard);

        let err = analyze(&wizard, api.as_ref(), &center).await.unwrap_err();
        assert!(matches!(err, ImportError::Api(ApiError::Validation(_))));
        assert_eq!(lock(&wizard).stage(), Stage::Upload);
        let last = center.history().pop().unwrap();
        assert_eq!(last.kind, NoticeKind::Error);
        assert!(last.message.starts_with("No columns were detected"));
    }

    #[tokio::test]
    async fn test_repeated_headers_are_mapped_separately() {
        let (api, center, wizard) = setup(FakeApi::default());
        *lock(&api.analyze) = Ok(AnalyzeResponse {
            columns: vec!["Email".into(), "Email".into()],
            sample: vec![],
        });
        choose_file(&wizard);

        assert_eq!(analyze(&wizard, api.as_ref(), &center).await.unwrap(), 2);
        let mut wizard = lock(&wizard);
        let columns = wizard.session().unwrap().columns.clone();
        assert_eq!(columns, vec!["Email".to_string(), "Email (2)".to_string()]);
        assert_eq!(wizard.session().unwrap().mapping.get("Email"), FieldTarget::Email);

        wizard.assign("Email (2)", FieldTarget::Notes).unwrap();
        assert_eq!(wizard.session().unwrap().mapping.get("Email"), FieldTarget::Email);
        wizard.confirm_mapping().unwrap();
    }

    #[tokio::test]
    async fn test_analyze_without_file_never_calls_api() {
        let (api, center, wizard) = setup(FakeApi::default());
        let err = analyze(&wizard, api.as_ref(), &center).await.unwrap_err();
        assert!(matches!(err, ImportError::Wizard(WizardError::NoFile)));
        assert!(api.calls().is_empty());
        assert_eq!(center.history()[0].kind, NoticeKind::Warning);
        assert_eq!(center.history()[0].message, "Choose a file to import first");
    }

    #[test]
    fn test_refused_step_warns() {
        let (_api, center, wizard) = setup(FakeApi::default());
        let err = step(&wizard, &center, |w| w.confirm_mapping()).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Wizard(WizardError::InvalidTransition { .. })
        ));
        let last = center.history().pop().unwrap();
        assert_eq!(last.kind, NoticeKind::Warning);
        assert!(last.message.starts_with("Cannot confirm the mapping"));
    }

    #[tokio::test]
    async fn test_duplicate_execute_is_ignored() {
        let (api, center, wizard) = setup(FakeApi::gated());
        choose_file(&wizard);
        {
            let mut wizard = lock(&wizard);
            let (ticket, _) = wizard.begin_analyze().unwrap();
            let analyzed = AnalyzeResponse {
                columns: vec!["Email".into()],
                sample: vec![],
            };
            wizard.finish_analyze(ticket, Ok(analyzed)).unwrap();
            wizard.confirm_mapping().unwrap();
            let (ticket, _) = wizard.begin_preview().unwrap();
            wizard
                .finish_preview(ticket, Ok(PreviewResponse::default()))
                .unwrap();
        }

        let (refresh, _reloads) = RefreshCoordinator::new(Duration::ZERO);
        let refresh = Arc::new(refresh);
        let first = {
            let (api, center, wizard, refresh) =
                (api.clone(), center.clone(), wizard.clone(), refresh.clone());
            tokio::spawn(async move {
                execute(&wizard, api.as_ref(), &center, &refresh, None).await
            })
        };
        while !api.calls().contains(&Call::Execute { campaign_id: None }) {
            tokio::task::yield_now().await;
        }

        let before = center.history().len();
        let second = execute(&wizard, api.as_ref(), &center, &refresh, None).await;
        assert!(matches!(
            second,
            Err(ImportError::Wizard(WizardError::AlreadyImporting))
        ));
        assert_eq!(center.history().len(), before);

        api.open_gate();
        assert!(first.await.unwrap().is_ok());
        let executes = api
            .calls()
            .iter()
            .filter(|call| matches!(call, Call::Execute { .. }))
            .count();
        assert_eq!(executes, 1);
    }

    #[tokio::test]
    async fn test_execute_failure_moves_to_failed() {
        let (api, center, wizard) = setup(FakeApi::default());
        *lock(&api.execute) = Err(ApiError::server("Quota exceeded"));
        choose_file(&wizard);
        analyze(&wizard, api.as_ref(), &center).await.unwrap();
        lock(&wizard).confirm_mapping().unwrap();
        preview(&wizard, api.as_ref(), &center).await.unwrap();
        lock(&wizard)
            .select_campaign(Some(Campaign {
                id: RowId::from(4),
                name: "Spring".into(),
            }))
            .unwrap();

        let (refresh, mut reloads) = RefreshCoordinator::new(Duration::ZERO);
        let err = execute(&wizard, api.as_ref(), &center, &refresh, Some("contacts"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Api(ApiError::Server { .. })));
        assert_eq!(lock(&wizard).stage(), Stage::Failed);
        assert_eq!(lock(&wizard).failure(), Some("Quota exceeded"));
        assert_eq!(center.history().last().unwrap().message, "Quota exceeded");
        assert!(reloads.try_recv().is_err());
        assert!(api.calls().contains(&Call::Execute {
            campaign_id: Some("4".into())
        }));
    }

    #[tokio::test]
    async fn test_partial_import_warns() {
        let (api, center, wizard) = setup(FakeApi::default());
        *lock(&api.execute) = Ok(ImportSummary {
            inserted: 3,
            skipped: 0,
            failed: 2,
            errors: vec!["row 4: invalid email".into()],
        });
        choose_file(&wizard);
        analyze(&wizard, api.as_ref(), &center).await.unwrap();
        lock(&wizard).confirm_mapping().unwrap();
        preview(&wizard, api.as_ref(), &center).await.unwrap();

        let (refresh, _reloads) = RefreshCoordinator::new(Duration::ZERO);
        execute(&wizard, api.as_ref(), &center, &refresh, None)
            .await
            .unwrap();
        let last = center.history().pop().unwrap();
        assert_eq!(last.kind, NoticeKind::Warning);
        assert!(last.message.contains("2 failed"));
    }

    #[tokio::test]
    async fn test_campaigns_loaded_into_wizard() {
        let (api, center, wizard) = setup(FakeApi::default());
        *lock(&api.campaigns) = Ok(vec![Campaign {
            id: RowId::from(1),
            name: "Newsletter".into(),
        }]);
        assert_eq!(load_campaigns(&wizard, api.as_ref(), &center).await.unwrap(), 1);
        assert_eq!(lock(&wizard).campaigns()[0].name, "Newsletter");
    }

    #[tokio::test]
    async fn test_registered_contacts_page_is_refreshed() {
        struct Counting(AtomicUsize);

        impl Refresher for Counting {
            fn refresh(&self) -> BoxFuture<'_, Result<usize, RefreshError>> {
                Box::pin(async move { Ok(self.0.fetch_add(1, Ordering::SeqCst) + 1) })
            }
        }

        let (api, center, wizard) = setup(FakeApi::default());
        choose_file(&wizard);
        analyze(&wizard, api.as_ref(), &center).await.unwrap();
        lock(&wizard).confirm_mapping().unwrap();
        preview(&wizard, api.as_ref(), &center).await.unwrap();

        let (refresh, mut reloads) = RefreshCoordinator::new(Duration::ZERO);
        let contacts = Arc::new(Counting(AtomicUsize::new(0)));
        refresh.register("contacts", contacts.clone());
        execute(&wizard, api.as_ref(), &center, &refresh, Some("contacts"))
            .await
            .unwrap();
        assert_eq!(contacts.0.load(Ordering::SeqCst), 1);
        assert!(reloads.try_recv().is_err());
    }
}
