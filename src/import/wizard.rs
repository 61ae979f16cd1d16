//! Import wizard state machine.
//!
//! Every network step is split in two: `begin_*` checks the stage and hands
//! out the request together with a [`Ticket`], `finish_*` applies the answer.
//! The wizard can therefore sit behind a plain mutex that is never held
//! across an await. Answers whose ticket is no longer current (the user went
//! back, retried or closed the wizard) are dropped.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::api::{
    AnalyzeResponse, Campaign, ExecuteRequest, ImportSummary, PreviewRequest, PreviewResponse,
    UploadFile,
};
use crate::config::ImportConfig;
use crate::error::{ApiError, ApiResult};
use crate::import::mapping::{suggest_mapping, unique_headers, ColumnMapping, FieldTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Upload,
    Analyzed,
    Mapped,
    Previewed,
    CampaignSelected,
    Importing,
    Done,
    Failed,
}

impl Stage {
    pub fn title(self) -> &'static str {
        match self {
            Stage::Upload => "Upload",
            Stage::Analyzed => "Map columns",
            Stage::Mapped => "Mapping confirmed",
            Stage::Previewed => "Preview",
            Stage::CampaignSelected => "Campaign",
            Stage::Importing => "Importing",
            Stage::Done => "Done",
            Stage::Failed => "Failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WizardError {
    #[error("choose a file to import first")]
    NoFile,

    #[error("{0} is empty")]
    EmptyFile(String),

    #[error("{name} is an unsupported file type (accepted: {accepted})")]
    UnsupportedType { name: String, accepted: String },

    #[error("cannot {action} while in stage {stage}")]
    InvalidTransition { action: &'static str, stage: Stage },

    #[error("map at least one column to email or phone")]
    MissingIdentifier,

    #[error("unknown column `{0}`")]
    UnknownColumn(String),

    #[error("an import is already running")]
    AlreadyImporting,

    #[error("a request is still running")]
    Busy,

    #[error("stage {0} has not been visited yet")]
    NotVisited(Stage),
}

/// Identifies one in-flight request of the wizard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Everything learned about the file being imported
#[derive(Debug, Clone)]
pub struct ImportSession {
    pub id: Uuid,
    pub file: UploadFile,
    pub columns: Vec<String>,
    pub sample: Vec<Vec<String>>,
    pub mapping: ColumnMapping,
    pub preview: Option<PreviewResponse>,
    pub campaign: Option<Campaign>,
}

impl ImportSession {
    fn new(file: UploadFile) -> Self {
        Self {
            id: Uuid::new_v4(),
            file,
            columns: Vec::new(),
            sample: Vec::new(),
            mapping: ColumnMapping::default(),
            preview: None,
            campaign: None,
        }
    }
}

pub struct ImportWizard {
    accepted_extensions: Vec<String>,
    preview_rows: usize,
    stage: Stage,
    visited: BTreeSet<Stage>,
    session: Option<ImportSession>,
    campaigns: Vec<Campaign>,
    summary: Option<ImportSummary>,
    failure: Option<String>,
    pending: Option<Ticket>,
    next_ticket: u64,
}

impl ImportWizard {
    pub fn new(config: &ImportConfig) -> Self {
        Self {
            accepted_extensions: config.accepted_extensions.clone(),
            preview_rows: config.preview_rows,
            stage: Stage::Upload,
            visited: BTreeSet::from([Stage::Upload]),
            session: None,
            campaigns: Vec::new(),
            summary: None,
            failure: None,
            pending: None,
            next_ticket: 0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn session(&self) -> Option<&ImportSession> {
        self.session.as_ref()
    }

    pub fn campaigns(&self) -> &[Campaign] {
        &self.campaigns
    }

    pub fn summary(&self) -> Option<&ImportSummary> {
        self.summary.as_ref()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// A request was handed out and has not been answered yet
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn select_file(&mut self, file: UploadFile) -> Result<(), WizardError> {
        self.expect_stage("select a file", &[Stage::Upload])?;
        self.expect_idle()?;
        if file.bytes.is_empty() {
            return Err(WizardError::EmptyFile(file.name));
        }
        if !self.accepts(&file.name) {
            return Err(WizardError::UnsupportedType {
                name: file.name,
                accepted: self.accepted_extensions.join(", "),
            });
        }
        self.session = Some(ImportSession::new(file));
        Ok(())
    }

    fn accepts(&self, name: &str) -> bool {
        name.rsplit_once('.').is_some_and(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            self.accepted_extensions.iter().any(|accepted| *accepted == ext)
        })
    }

    pub fn begin_analyze(&mut self) -> Result<(Ticket, UploadFile), WizardError> {
        self.expect_stage("analyze", &[Stage::Upload])?;
        self.expect_idle()?;
        let file = self.session.as_ref().ok_or(WizardError::NoFile)?.file.clone();
        Ok((self.issue_ticket(), file))
    }

    /// Returns the number of detected columns, or None when the answer was stale
    pub fn finish_analyze(
        &mut self,
        ticket: Ticket,
        result: ApiResult<AnalyzeResponse>,
    ) -> Result<Option<usize>, ApiError> {
        if !self.redeem(ticket) {
            return Ok(None);
        }
        let response = result?;
        if response.columns.is_empty() {
            return Err(ApiError::validation(
                "No columns were detected in the file. Check that it has a header row.",
            ));
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        let columns = unique_headers(response.columns);
        session.mapping = suggest_mapping(&columns);
        session.columns = columns;
        session.sample = response.sample;
        let count = session.columns.len();
        self.enter(Stage::Analyzed);
        Ok(Some(count))
    }

    /// Point one column at a field. Changing a confirmed mapping un-confirms it.
    pub fn assign(&mut self, column: &str, target: FieldTarget) -> Result<(), WizardError> {
        self.expect_stage("change the mapping", &[Stage::Analyzed, Stage::Mapped])?;
        self.expect_idle()?;
        let session = self.session.as_mut().ok_or(WizardError::NoFile)?;
        if !session.columns.iter().any(|c| c == column) {
            return Err(WizardError::UnknownColumn(column.to_string()));
        }
        if session.mapping.set(column, target) && self.stage == Stage::Mapped {
            self.stage = Stage::Analyzed;
        }
        Ok(())
    }

    pub fn confirm_mapping(&mut self) -> Result<(), WizardError> {
        self.expect_stage("confirm the mapping", &[Stage::Analyzed, Stage::Mapped])?;
        self.expect_idle()?;
        let session = self.session.as_ref().ok_or(WizardError::NoFile)?;
        if !session.mapping.has_identifier() {
            return Err(WizardError::MissingIdentifier);
        }
        self.enter(Stage::Mapped);
        Ok(())
    }

    pub fn begin_preview(&mut self) -> Result<(Ticket, PreviewRequest), WizardError> {
        self.expect_stage("preview", &[Stage::Mapped])?;
        self.expect_idle()?;
        let session = self.session.as_ref().ok_or(WizardError::NoFile)?;
        let request = PreviewRequest {
            mapping: session.mapping.clone(),
            limit: self.preview_rows,
        };
        Ok((self.issue_ticket(), request))
    }

    /// Returns the number of preview rows, or None when the answer was stale
    pub fn finish_preview(
        &mut self,
        ticket: Ticket,
        result: ApiResult<PreviewResponse>,
    ) -> Result<Option<usize>, ApiError> {
        if !self.redeem(ticket) {
            return Ok(None);
        }
        let preview = result?;
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        let rows = preview.rows.len();
        session.preview = Some(preview);
        self.enter(Stage::Previewed);
        Ok(Some(rows))
    }

    pub fn set_campaigns(&mut self, campaigns: Vec<Campaign>) {
        self.campaigns = campaigns;
    }

    /// Choose the campaign new contacts join, or none
    pub fn select_campaign(&mut self, campaign: Option<Campaign>) -> Result<(), WizardError> {
        self.expect_stage("choose a campaign", &[Stage::Previewed, Stage::CampaignSelected])?;
        self.expect_idle()?;
        let session = self.session.as_mut().ok_or(WizardError::NoFile)?;
        session.campaign = campaign;
        self.enter(Stage::CampaignSelected);
        Ok(())
    }

    pub fn begin_import(&mut self) -> Result<(Ticket, ExecuteRequest), WizardError> {
        if self.stage == Stage::Importing {
            return Err(WizardError::AlreadyImporting);
        }
        self.expect_stage("import", &[Stage::Previewed, Stage::CampaignSelected])?;
        self.expect_idle()?;
        let session = self.session.as_ref().ok_or(WizardError::NoFile)?;
        let request = ExecuteRequest {
            mapping: session.mapping.clone(),
            campaign_id: session.campaign.as_ref().map(|c| c.id.to_string()),
            session_id: session.id,
        };
        let ticket = self.issue_ticket();
        self.enter(Stage::Importing);
        Ok((ticket, request))
    }

    /// Returns the summary, or None when the answer was stale
    pub fn finish_import(
        &mut self,
        ticket: Ticket,
        result: ApiResult<ImportSummary>,
    ) -> Result<Option<ImportSummary>, ApiError> {
        if !self.redeem(ticket) {
            return Ok(None);
        }
        match result {
            Ok(summary) => {
                self.summary = Some(summary.clone());
                self.enter(Stage::Done);
                Ok(Some(summary))
            }
            Err(err) => {
                self.failure = Some(err.user_message());
                self.enter(Stage::Failed);
                Err(err)
            }
        }
    }

    /// Back to the mapping after a failed import; columns and mapping are kept
    pub fn retry(&mut self) -> Result<(), WizardError> {
        self.expect_stage("retry", &[Stage::Failed])?;
        self.failure = None;
        if let Some(session) = self.session.as_mut() {
            session.preview = None;
        }
        self.stage = Stage::Mapped;
        Ok(())
    }

    /// Return to a stage already visited. Requests still running are abandoned.
    pub fn back_to(&mut self, target: Stage) -> Result<(), WizardError> {
        if matches!(self.stage, Stage::Importing | Stage::Done) || target >= self.stage {
            return Err(WizardError::InvalidTransition {
                action: "go back",
                stage: self.stage,
            });
        }
        if target >= Stage::Importing {
            return Err(WizardError::InvalidTransition {
                action: "go back",
                stage: self.stage,
            });
        }
        if !self.visited.contains(&target) {
            return Err(WizardError::NotVisited(target));
        }

        if self.pending.take().is_some() {
            debug!(from = %self.stage, to = %target, "abandoning running request");
        }
        self.failure = None;
        if let Some(session) = self.session.as_mut() {
            if target < Stage::Previewed {
                session.preview = None;
            }
            if target == Stage::Upload {
                session.columns.clear();
                session.sample.clear();
                session.mapping = ColumnMapping::default();
            }
        }
        self.stage = target;
        Ok(())
    }

    /// Discard the session and start over
    pub fn reset(&mut self) {
        if self.pending.take().is_some() {
            debug!(stage = %self.stage, "abandoning running request");
        }
        self.stage = Stage::Upload;
        self.visited = BTreeSet::from([Stage::Upload]);
        self.session = None;
        self.summary = None;
        self.failure = None;
    }

    fn expect_stage(&self, action: &'static str, allowed: &[Stage]) -> Result<(), WizardError> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(WizardError::InvalidTransition {
                action,
                stage: self.stage,
            })
        }
    }

    fn expect_idle(&self) -> Result<(), WizardError> {
        if self.pending.is_some() {
            Err(WizardError::Busy)
        } else {
            Ok(())
        }
    }

    fn issue_ticket(&mut self) -> Ticket {
        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        self.pending = Some(ticket);
        ticket
    }

    /// Consume the ticket if it is the current one
    fn redeem(&mut self, ticket: Ticket) -> bool {
        if self.pending == Some(ticket) {
            self.pending = None;
            true
        } else {
            debug!(?ticket, stage = %self.stage, "dropping stale answer");
            false
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.visited.insert(stage);
    }
}
