use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::admin::StageAdminController;
use super::column::{ApplyOutcome, ColumnSet, PageTicket, StageColumnStore};
use super::drag::{
    DragRelocationController, DropOutcome, DropTarget, GestureRejected, PendingMove, Point,
    SettleOutcome,
};
use super::events::{BoardEvent, NoticeLevel, broadcast_event};
use super::fetcher::{FetchedPage, PageFetcher};
use super::filter::FilterController;
use super::models::{
    Lead, LeadId, OwnershipScope, PageQuery, PipelineId, Stage, StageId, StagePatch,
};
use super::registry::AggregateRegistry;
use crate::config::BoardSettings;
use crate::errors::BoardError;
use crate::identity::IdentityProvider;
use crate::store::{LeadStore, StageStore};

const EVENT_CAPACITY: usize = 256;

/// Result of an asynchronous call, delivered back to the board's task.
#[derive(Debug)]
enum Completion {
    Page {
        ticket: PageTicket,
        result: Result<FetchedPage, BoardError>,
    },
    Relocation {
        lead_id: LeadId,
        result: Result<Lead, BoardError>,
    },
}

enum Wake {
    Completion(Completion),
    Debounce,
}

/// Scroll position of one column, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub viewport_height: f64,
    pub content_height: f64,
}

impl ScrollMetrics {
    /// Within `threshold` px of the bottom.
    pub fn near_bottom(&self, threshold: f64) -> bool {
        self.content_height - (self.scroll_top + self.viewport_height) <= threshold
    }
}

/// Inputs accepted by [`KanbanBoard::run`].
#[derive(Debug, Clone)]
pub enum BoardCommand {
    SearchInput(String),
    FlushSearch,
    SetScope(OwnershipScope),
    LoadMore(StageId),
    Scrolled {
        stage_id: StageId,
        metrics: ScrollMetrics,
    },
    Retry(StageId),
    PointerDown {
        lead_id: LeadId,
        at: Point,
    },
    PointerMove(Point),
    KeyboardPick(LeadId),
    Release(DropTarget),
    CancelDrag,
    CreateStage {
        name: String,
        color: Option<String>,
    },
    RenameStage {
        stage_id: StageId,
        name: String,
    },
    RecolorStage {
        stage_id: StageId,
        color: Option<String>,
    },
    DeleteStage(StageId),
    Shutdown,
}

/// Composition root: one pipeline's columns, the shared registry, the
/// filter and the drag controller.
///
/// All state lives on the task that owns the board. Fetches and commits run
/// as spawned tasks and report back through a completion channel, which
/// `process_next` / `run` drain on the owning task.
pub struct KanbanBoard {
    pipeline_id: PipelineId,
    settings: BoardSettings,
    fetcher: PageFetcher,
    lead_store: Arc<dyn LeadStore>,
    stage_store: Arc<dyn StageStore>,
    admin: StageAdminController,
    stages: Vec<Stage>,
    columns: ColumnSet,
    registry: AggregateRegistry,
    filter: FilterController,
    drag: DragRelocationController,
    events: broadcast::Sender<BoardEvent>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    outstanding: usize,
}

impl KanbanBoard {
    pub fn new(
        pipeline_id: PipelineId,
        settings: BoardSettings,
        lead_store: Arc<dyn LeadStore>,
        stage_store: Arc<dyn StageStore>,
        identity: &dyn IdentityProvider,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            pipeline_id,
            fetcher: PageFetcher::new(lead_store.clone()),
            admin: StageAdminController::new(stage_store.clone(), lead_store.clone()),
            filter: FilterController::new(settings.search_debounce(), identity),
            drag: DragRelocationController::new(settings.drag_activation_distance),
            settings,
            lead_store,
            stage_store,
            stages: Vec::new(),
            columns: ColumnSet::new(),
            registry: AggregateRegistry::new(),
            events,
            completion_tx,
            completion_rx,
            outstanding: 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    pub fn pipeline_id(&self) -> &PipelineId {
        &self.pipeline_id
    }

    /// Stages in column order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    pub fn column(&self, stage_id: &StageId) -> Option<&StageColumnStore> {
        self.columns.get(stage_id)
    }

    pub fn registry(&self) -> &AggregateRegistry {
        &self.registry
    }

    pub fn filter(&self) -> &FilterController {
        &self.filter
    }

    pub fn drag(&self) -> &DragRelocationController {
        &self.drag
    }

    /// Record for the drag overlay.
    pub fn active_lead(&self) -> Option<&Lead> {
        self.drag
            .active_lead_id()
            .and_then(|id| self.registry.lookup(id))
    }

    pub fn is_moving(&self, lead_id: &LeadId) -> bool {
        self.drag.is_moving(lead_id)
    }

    /// Load the pipeline's stages and start every column from offset zero.
    pub async fn open(&mut self) -> Result<(), BoardError> {
        let mut stages = self
            .stage_store
            .list_stages(&self.pipeline_id)
            .await
            .map_err(BoardError::StagesUnavailable)?;
        stages.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));

        self.columns = ColumnSet::new();
        self.registry = AggregateRegistry::new();
        for stage in &stages {
            self.columns
                .push(StageColumnStore::new(stage.id.clone(), self.settings.page_size));
        }
        info!(pipeline_id = %self.pipeline_id, stages = stages.len(), "board opened");
        self.stages = stages;
        self.initialize_all();
        Ok(())
    }

    fn initialize_all(&mut self) {
        let generation = self.filter.generation();
        for stage_id in self.columns.stage_ids() {
            self.initialize_column(&stage_id, generation);
        }
    }

    fn initialize_column(&mut self, stage_id: &StageId, generation: u64) {
        let Some(column) = self.columns.get_mut(stage_id) else {
            return;
        };
        let ticket = column.initialize(generation);
        self.registry.reconcile_column(column);
        self.spawn_fetch(ticket);
    }

    fn spawn_fetch(&mut self, ticket: PageTicket) {
        let query = PageQuery {
            stage_id: ticket.stage_id.clone(),
            pipeline_id: self.pipeline_id.clone(),
            scope: self.filter.scope().clone(),
            search: self.filter.search().to_string(),
            offset: ticket.offset,
            limit: ticket.limit,
        };
        let fetcher = self.fetcher.clone();
        let tx = self.completion_tx.clone();
        self.outstanding += 1;
        tokio::spawn(async move {
            let result = fetcher.fetch(query).await;
            let _ = tx.send(Completion::Page { ticket, result });
        });
    }

    fn spawn_commit(&mut self, pending: &PendingMove) {
        let store = self.lead_store.clone();
        let tx = self.completion_tx.clone();
        let lead_id = pending.lead_id.clone();
        let stage_id = pending.to_stage.clone();
        self.outstanding += 1;
        tokio::spawn(async move {
            let result = store
                .update_lead_stage(&lead_id, &stage_id)
                .await
                .map_err(|source| BoardError::RelocationCommitFailed {
                    lead_id: lead_id.clone(),
                    source,
                });
            let _ = tx.send(Completion::Relocation { lead_id, result });
        });
    }

    /// Request the next page of a column. Returns whether a fetch was issued.
    pub fn load_more(&mut self, stage_id: &StageId) -> bool {
        let Some(ticket) = self.columns.get_mut(stage_id).and_then(|c| c.load_more()) else {
            return false;
        };
        self.spawn_fetch(ticket);
        true
    }

    pub fn on_scroll(&mut self, stage_id: &StageId, metrics: ScrollMetrics) -> bool {
        metrics.near_bottom(self.settings.scroll_threshold) && self.load_more(stage_id)
    }

    /// Re-issue a column's failed load.
    pub fn retry(&mut self, stage_id: &StageId) -> bool {
        let Some(ticket) = self.columns.get_mut(stage_id).and_then(|c| c.retry()) else {
            return false;
        };
        if let Some(column) = self.columns.get(stage_id) {
            self.registry.reconcile_column(column);
        }
        self.spawn_fetch(ticket);
        true
    }

    pub fn set_search_input(&mut self, text: impl Into<String>) {
        self.filter.set_search_input(text, Instant::now());
    }

    /// Commit typed search text without waiting for the quiet period.
    pub fn flush_search(&mut self) {
        if self.filter.flush().is_some() {
            self.initialize_all();
        }
    }

    pub fn set_scope(&mut self, scope: OwnershipScope) -> Result<(), BoardError> {
        if self.filter.set_scope(scope)?.is_some() {
            self.initialize_all();
        }
        Ok(())
    }

    fn poll_filter(&mut self) {
        if self.filter.poll(Instant::now()).is_some() {
            self.initialize_all();
        }
    }

    // ── Gestures ──────────────────────────────────────────────────────

    pub fn pointer_down(&mut self, lead_id: &LeadId, at: Point) -> Result<(), GestureRejected> {
        self.drag.pointer_down(lead_id, at, &self.registry)
    }

    pub fn pointer_move(&mut self, at: Point) -> Option<LeadId> {
        self.drag.pointer_move(at)
    }

    pub fn keyboard_pick(&mut self, lead_id: &LeadId) -> Result<(), GestureRejected> {
        self.drag.keyboard_pick(lead_id, &self.registry)
    }

    pub fn cancel_drag(&mut self) {
        self.drag.cancel();
    }

    pub fn select_lead(&self, lead_id: &LeadId) {
        broadcast_event(
            &self.events,
            BoardEvent::LeadSelected {
                lead_id: lead_id.clone(),
            },
        );
    }

    /// Finish the current gesture over `target`.
    pub fn release(&mut self, target: DropTarget) -> DropOutcome {
        let outcome = self
            .drag
            .release(&target, &mut self.registry, &mut self.columns, Utc::now());
        match &outcome {
            DropOutcome::Click(lead_id) => self.select_lead(lead_id),
            DropOutcome::Relocated(pending) => self.spawn_commit(pending),
            DropOutcome::Rejected { .. } | DropOutcome::Ignored => {}
        }
        outcome
    }

    // ── Stage administration ──────────────────────────────────────────

    pub async fn create_stage(
        &mut self,
        name: &str,
        color: Option<String>,
    ) -> Result<Stage, BoardError> {
        let stage = self
            .admin
            .create_stage(&self.stages, name, color, &self.pipeline_id)
            .await?;
        self.columns
            .push(StageColumnStore::new(stage.id.clone(), self.settings.page_size));
        self.stages.push(stage.clone());
        self.initialize_column(&stage.id, self.filter.generation());
        Ok(stage)
    }

    pub async fn rename_stage(
        &mut self,
        stage_id: &StageId,
        name: &str,
    ) -> Result<Stage, BoardError> {
        self.update_stage(
            stage_id,
            StagePatch {
                name: Some(name.to_string()),
                color: None,
            },
        )
        .await
    }

    pub async fn recolor_stage(
        &mut self,
        stage_id: &StageId,
        color: Option<String>,
    ) -> Result<Stage, BoardError> {
        self.update_stage(
            stage_id,
            StagePatch {
                name: None,
                color: Some(color),
            },
        )
        .await
    }

    async fn update_stage(
        &mut self,
        stage_id: &StageId,
        patch: StagePatch,
    ) -> Result<Stage, BoardError> {
        self.known_stage(stage_id)?;
        let updated = self.admin.rename_or_recolor(stage_id, patch).await?;
        if let Some(slot) = self.stages.iter_mut().find(|s| &s.id == stage_id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    pub async fn delete_stage(&mut self, stage_id: &StageId) -> Result<(), BoardError> {
        self.known_stage(stage_id)?;
        self.admin.delete_stage(stage_id, &self.registry).await?;
        self.stages.retain(|s| &s.id != stage_id);
        self.columns.remove(stage_id);
        self.registry.remove_stage(stage_id);
        Ok(())
    }

    fn known_stage(&self, stage_id: &StageId) -> Result<(), BoardError> {
        if self.columns.contains(stage_id) {
            Ok(())
        } else {
            Err(BoardError::UnknownStage {
                stage_id: stage_id.clone(),
            })
        }
    }

    // ── Event loop ────────────────────────────────────────────────────

    /// Wait for the next completion or debounce deadline and apply it.
    /// Returns `false` when nothing is outstanding.
    pub async fn process_next(&mut self) -> bool {
        let deadline = self.filter.deadline();
        if self.outstanding == 0 && deadline.is_none() {
            return false;
        }
        let debounce_at = deadline.unwrap_or_else(Instant::now);
        let wake = tokio::select! {
            Some(completion) = self.completion_rx.recv(), if self.outstanding > 0 => {
                Wake::Completion(completion)
            }
            _ = tokio::time::sleep_until(debounce_at), if deadline.is_some() => {
                Wake::Debounce
            }
        };
        self.wake(wake);
        true
    }

    /// Drain until no fetch, commit or pending search remains.
    pub async fn settle(&mut self) {
        while self.process_next().await {}
    }

    fn wake(&mut self, wake: Wake) {
        match wake {
            Wake::Completion(completion) => self.handle_completion(completion),
            Wake::Debounce => self.poll_filter(),
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        self.outstanding = self.outstanding.saturating_sub(1);
        match completion {
            Completion::Page { ticket, result } => self.apply_page(ticket, result),
            Completion::Relocation { lead_id, result } => self.apply_relocation(lead_id, result),
        }
    }

    fn apply_page(&mut self, ticket: PageTicket, result: Result<FetchedPage, BoardError>) {
        let Some(column) = self.columns.get_mut(&ticket.stage_id) else {
            debug!(stage_id = %ticket.stage_id, "page for a removed column dropped");
            return;
        };
        match column.apply(&ticket, result) {
            ApplyOutcome::Applied { added } => {
                debug!(
                    stage_id = %ticket.stage_id,
                    added,
                    total = column.total_count(),
                    "page applied"
                );
                self.registry.reconcile_column(column);
            }
            ApplyOutcome::Failed => {
                let message = column.last_error().unwrap_or("page load failed").to_string();
                warn!(stage_id = %ticket.stage_id, error = %message, "column load failed");
                self.notify(NoticeLevel::Warning, message);
            }
            ApplyOutcome::Discarded => {}
        }
    }

    fn apply_relocation(&mut self, lead_id: LeadId, result: Result<Lead, BoardError>) {
        let reason = result.as_ref().err().map(|e| e.to_string());
        let outcome = self.drag.settle(
            &lead_id,
            result.is_ok(),
            &mut self.registry,
            &mut self.columns,
        );
        match outcome {
            SettleOutcome::Committed(pending) => broadcast_event(
                &self.events,
                BoardEvent::LeadRelocated {
                    lead_id,
                    from_stage: pending.from_stage,
                    to_stage: pending.to_stage,
                },
            ),
            SettleOutcome::RolledBack(pending) => {
                let reason = reason.unwrap_or_default();
                warn!(lead_id = %lead_id, error = %reason, "relocation commit failed");
                broadcast_event(
                    &self.events,
                    BoardEvent::RelocationReverted {
                        lead_id,
                        stage_id: pending.from_stage,
                        reason: reason.clone(),
                    },
                );
                self.notify(NoticeLevel::Error, reason);
            }
            SettleOutcome::Unknown => {
                debug!(lead_id = %lead_id, "settle for unknown relocation ignored");
            }
        }
    }

    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        broadcast_event(
            &self.events,
            BoardEvent::Notice {
                level,
                message: message.into(),
            },
        );
    }

    /// Drive the board from a command channel until `Shutdown` or the sender
    /// goes away. Command failures are reported as notices.
    pub async fn run(mut self, mut commands: mpsc::Receiver<BoardCommand>) {
        loop {
            let deadline = self.filter.deadline();
            let debounce_at = deadline.unwrap_or_else(Instant::now);
            let next = tokio::select! {
                command = commands.recv() => match command {
                    Some(BoardCommand::Shutdown) | None => break,
                    Some(command) => Ok(command),
                },
                Some(completion) = self.completion_rx.recv(), if self.outstanding > 0 => {
                    Err(Wake::Completion(completion))
                }
                _ = tokio::time::sleep_until(debounce_at), if deadline.is_some() => {
                    Err(Wake::Debounce)
                }
            };
            match next {
                Ok(command) => {
                    if let Err(err) = self.dispatch(command).await {
                        let level = if err.is_rejection() {
                            NoticeLevel::Info
                        } else {
                            NoticeLevel::Error
                        };
                        self.notify(level, err.to_string());
                    }
                }
                Err(wake) => self.wake(wake),
            }
        }
        debug!(pipeline_id = %self.pipeline_id, "board loop stopped");
    }

    async fn dispatch(&mut self, command: BoardCommand) -> Result<(), BoardError> {
        match command {
            BoardCommand::SearchInput(text) => self.set_search_input(text),
            BoardCommand::FlushSearch => self.flush_search(),
            BoardCommand::SetScope(scope) => self.set_scope(scope)?,
            BoardCommand::LoadMore(stage_id) => {
                self.load_more(&stage_id);
            }
            BoardCommand::Scrolled { stage_id, metrics } => {
                self.on_scroll(&stage_id, metrics);
            }
            BoardCommand::Retry(stage_id) => {
                self.retry(&stage_id);
            }
            BoardCommand::PointerDown { lead_id, at } => {
                if let Err(rejected) = self.pointer_down(&lead_id, at) {
                    self.notify(NoticeLevel::Info, rejected.to_string());
                }
            }
            BoardCommand::PointerMove(at) => {
                self.pointer_move(at);
            }
            BoardCommand::KeyboardPick(lead_id) => {
                if let Err(rejected) = self.keyboard_pick(&lead_id) {
                    self.notify(NoticeLevel::Info, rejected.to_string());
                }
            }
            BoardCommand::Release(target) => {
                self.release(target);
            }
            BoardCommand::CancelDrag => self.cancel_drag(),
            BoardCommand::CreateStage { name, color } => {
                self.create_stage(&name, color).await?;
            }
            BoardCommand::RenameStage { stage_id, name } => {
                self.rename_stage(&stage_id, &name).await?;
            }
            BoardCommand::RecolorStage { stage_id, color } => {
                self.recolor_stage(&stage_id, color).await?;
            }
            BoardCommand::DeleteStage(stage_id) => self.delete_stage(&stage_id).await?,
            BoardCommand::Shutdown => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::board::models::EmployeeId;
    use crate::board::testing::ScriptedStore;
    use crate::identity::StaticIdentity;

    fn board_with(store: &ScriptedStore, settings: BoardSettings) -> KanbanBoard {
        let shared = Arc::new(store.clone());
        KanbanBoard::new(
            PipelineId::from("p1"),
            settings,
            shared.clone(),
            shared,
            &StaticIdentity::default(),
        )
    }

    async fn opened(store: &ScriptedStore) -> KanbanBoard {
        let mut board = board_with(store, BoardSettings::default());
        board.open().await.unwrap();
        board.settle().await;
        board
    }

    fn total(board: &KanbanBoard, stage: &str) -> usize {
        board.column(&StageId::from(stage)).unwrap().total_count()
    }

    fn loaded(board: &KanbanBoard, stage: &str) -> usize {
        board.column(&StageId::from(stage)).unwrap().leads().len()
    }

    #[tokio::test(start_paused = true)]
    async fn open_loads_first_page_of_every_column() {
        let store = ScriptedStore::seeded(&[("new", 45), ("won", 3)]);
        let board = opened(&store).await;

        assert_eq!(board.stages().len(), 2);
        assert_eq!((loaded(&board, "new"), total(&board, "new")), (20, 45));
        assert_eq!((loaded(&board, "won"), total(&board, "won")), (3, 3));
        assert_eq!(board.registry().len(), 23);
        assert_eq!(store.fetch_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn load_more_pages_through_a_column() {
        let store = ScriptedStore::seeded(&[("new", 45)]);
        let mut board = opened(&store).await;
        let new = StageId::from("new");

        let mut seen = Vec::new();
        while board.load_more(&new) {
            board.settle().await;
            let column = board.column(&new).unwrap();
            seen.push((column.leads().len(), column.has_more()));
        }
        assert_eq!(seen, vec![(40, true), (45, false)]);
        assert_eq!(board.registry().count_in_stage(&new), 45);
    }

    #[tokio::test(start_paused = true)]
    async fn double_load_more_issues_one_fetch() {
        let store = ScriptedStore::seeded(&[("new", 45)]);
        let mut board = opened(&store).await;
        let before = store.fetch_calls();

        assert!(board.load_more(&StageId::from("new")));
        assert!(!board.load_more(&StageId::from("new")));
        board.settle().await;
        assert_eq!(store.fetch_calls(), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_near_bottom_triggers_load_more() {
        let store = ScriptedStore::seeded(&[("new", 45)]);
        let mut board = opened(&store).await;
        let new = StageId::from("new");

        let far = ScrollMetrics {
            scroll_top: 100.0,
            viewport_height: 400.0,
            content_height: 1000.0,
        };
        assert!(!board.on_scroll(&new, far));

        let jittery = ScrollMetrics {
            scroll_top: 599.6,
            viewport_height: 400.0,
            content_height: 1000.0,
        };
        assert!(board.on_scroll(&new, jittery));
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_search_fans_out_once_per_column() {
        let store = ScriptedStore::seeded(&[("new", 12), ("won", 4)]);
        let mut board = opened(&store).await;
        let before = store.fetch_calls();

        board.set_search_input("ali");
        tokio::time::advance(Duration::from_millis(100)).await;
        board.set_search_input("aliy");
        board.settle().await;

        let log = store.fetch_log();
        let issued = &log[before..];
        assert_eq!(issued.len(), 2);
        assert!(issued.iter().all(|q| q.search == "aliy" && q.offset == 0));
        assert_eq!(board.filter().generation(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn search_reset_leaves_no_rows_from_previous_filter() {
        let store = ScriptedStore::seeded(&[("new", 30), ("won", 5)]);
        let mut board = opened(&store).await;

        board.set_search_input("new-00");
        board.flush_search();
        assert!(board.columns().iter().all(|c| c.leads().is_empty()));
        assert!(board.registry().is_empty());

        board.settle().await;
        assert_eq!(total(&board, "new"), 10);
        assert_eq!(total(&board, "won"), 0);
        assert!(
            board
                .column(&StageId::from("new"))
                .unwrap()
                .leads()
                .iter()
                .all(|l| l.id.as_str().starts_with("new-00"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_response_from_superseded_filter_is_ignored() {
        let store = ScriptedStore::seeded(&[("new", 30), ("won", 5)]);
        let mut board = opened(&store).await;

        store.delay_fetches([
            Duration::from_millis(500),
            Duration::from_millis(500),
            Duration::from_millis(10),
            Duration::from_millis(10),
        ]);
        board.set_search_input("new-00");
        board.flush_search();
        tokio::task::yield_now().await;
        board.set_search_input("won-");
        board.flush_search();
        board.settle().await;

        assert_eq!(board.filter().search(), "won-");
        assert_eq!(total(&board, "new"), 0);
        assert_eq!(total(&board, "won"), 5);
        assert_eq!(board.registry().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn committed_relocation_keeps_optimistic_counts() {
        let store = ScriptedStore::seeded(&[("a", 10), ("b", 3)]);
        store.delay_updates(Duration::from_millis(50));
        let mut board = opened(&store).await;
        let mut events = board.subscribe();
        let lead = LeadId::from("a-004");

        board.keyboard_pick(&lead).unwrap();
        assert_eq!(board.active_lead().map(|l| l.id.clone()), Some(lead.clone()));
        let outcome = board.release(DropTarget::Stage(StageId::from("b")));
        assert!(matches!(outcome, DropOutcome::Relocated(_)));
        assert_eq!((total(&board, "a"), total(&board, "b")), (9, 4));
        assert!(board.is_moving(&lead));
        assert!(board.active_lead().is_none());

        board.settle().await;
        assert!(!board.is_moving(&lead));
        assert_eq!((total(&board, "a"), total(&board, "b")), (9, 4));
        assert_eq!(
            store.memory.lead(&lead).unwrap().unwrap().stage_id.as_str(),
            "b"
        );
        assert_eq!(
            events.try_recv().unwrap(),
            BoardEvent::LeadRelocated {
                lead_id: lead,
                from_stage: StageId::from("a"),
                to_stage: StageId::from("b"),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_relocation_rolls_back() {
        let store = ScriptedStore::seeded(&[("a", 10), ("b", 3)]);
        store.fail_updates(true);
        let mut board = opened(&store).await;
        let mut events = board.subscribe();
        let lead = LeadId::from("a-004");

        board.keyboard_pick(&lead).unwrap();
        board.release(DropTarget::Lead(LeadId::from("b-001")));
        assert_eq!((total(&board, "a"), total(&board, "b")), (9, 4));

        board.settle().await;
        assert_eq!((total(&board, "a"), total(&board, "b")), (10, 3));
        assert_eq!(
            board.registry().lookup(&lead).unwrap().stage_id.as_str(),
            "a"
        );
        assert!(!board.is_moving(&lead));
        assert!(matches!(
            events.try_recv().unwrap(),
            BoardEvent::RelocationReverted { .. }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            BoardEvent::Notice {
                level: NoticeLevel::Error,
                ..
            }
        ));
    }

    fn ids(board: &KanbanBoard, stage: &str) -> Vec<String> {
        let column = board.column(&StageId::from(stage)).unwrap();
        let mut ids: Vec<_> = column.leads().iter().map(|l| l.id.to_string()).collect();
        ids.sort();
        ids
    }

    #[tokio::test(start_paused = true)]
    async fn load_more_into_destination_while_commit_pending() {
        let store = ScriptedStore::seeded(&[("a", 3), ("b", 25)]);
        store.delay_updates(Duration::from_millis(500));
        let mut board = opened(&store).await;
        let before = board.columns().total_count();
        let lead = LeadId::from("a-000");

        board.keyboard_pick(&lead).unwrap();
        board.release(DropTarget::Stage(StageId::from("b")));
        assert!(board.load_more(&StageId::from("b")));
        board.settle().await;
        assert_eq!(store.fetch_log().last().unwrap().offset, 20);

        let column = board.column(&StageId::from("b")).unwrap();
        assert_eq!((column.leads().len(), column.total_count()), (26, 26));
        assert!(!column.has_more());
        let mut expected: Vec<_> = (0..25).map(|i| format!("b-{i:03}")).collect();
        expected.push("a-000".into());
        expected.sort();
        assert_eq!(ids(&board, "b"), expected);
        assert_eq!(board.columns().total_count(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn load_more_from_source_while_commit_pending() {
        let store = ScriptedStore::seeded(&[("a", 25), ("b", 3)]);
        store.delay_updates(Duration::from_millis(500));
        let mut board = opened(&store).await;
        // Newest lead, so it is on the first page.
        let lead = LeadId::from("a-024");

        board.keyboard_pick(&lead).unwrap();
        board.release(DropTarget::Stage(StageId::from("b")));
        assert!(board.load_more(&StageId::from("a")));
        board.settle().await;

        let column = board.column(&StageId::from("a")).unwrap();
        assert!(!column.contains(&lead));
        assert_eq!((column.leads().len(), column.total_count()), (24, 24));
        assert!(!column.has_more());
        let expected: Vec<_> = (0..24).map(|i| format!("a-{i:03}")).collect();
        assert_eq!(ids(&board, "a"), expected);
        assert_eq!(board.columns().total_count(), 28);
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_after_load_more_restores_counts() {
        let store = ScriptedStore::seeded(&[("a", 3), ("b", 25)]);
        store.delay_updates(Duration::from_millis(500));
        store.fail_updates(true);
        let mut board = opened(&store).await;
        let lead = LeadId::from("a-000");

        board.keyboard_pick(&lead).unwrap();
        board.release(DropTarget::Stage(StageId::from("b")));
        assert!(board.load_more(&StageId::from("b")));
        board.settle().await;

        assert_eq!((total(&board, "a"), total(&board, "b")), (3, 25));
        assert_eq!((loaded(&board, "a"), loaded(&board, "b")), (3, 25));
        assert!(board.columns().iter().all(|c| c.pending_moves() == 0));
        assert!(board.column(&StageId::from("a")).unwrap().contains(&lead));
    }

    #[tokio::test(start_paused = true)]
    async fn moving_lead_rejects_new_gestures() {
        let store = ScriptedStore::seeded(&[("a", 2), ("b", 1)]);
        store.delay_updates(Duration::from_millis(50));
        let mut board = opened(&store).await;
        let lead = LeadId::from("a-000");

        board.keyboard_pick(&lead).unwrap();
        board.release(DropTarget::Stage(StageId::from("b")));
        assert_eq!(
            board.pointer_down(&lead, Point::new(0.0, 0.0)),
            Err(GestureRejected::LeadBusy(lead.clone()))
        );
        board.settle().await;
        assert!(board.keyboard_pick(&lead).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn click_emits_lead_selected() {
        let store = ScriptedStore::seeded(&[("a", 2)]);
        let mut board = opened(&store).await;
        let mut events = board.subscribe();
        let lead = LeadId::from("a-001");

        board.pointer_down(&lead, Point::new(10.0, 10.0)).unwrap();
        board.pointer_move(Point::new(12.0, 11.0));
        assert_eq!(board.release(DropTarget::Nowhere), DropOutcome::Click(lead.clone()));
        assert_eq!(events.try_recv().unwrap(), BoardEvent::LeadSelected { lead_id: lead });
    }

    #[tokio::test(start_paused = true)]
    async fn scope_change_reloads_every_column() {
        let store = ScriptedStore::seeded(&[("a", 3), ("b", 2)]);
        let mut owned = store.memory.lead(&LeadId::from("a-001")).unwrap().unwrap();
        owned.owner_id = Some(EmployeeId::from("emp-1"));
        store.memory.insert_lead(owned).unwrap();
        let mut board = opened(&store).await;

        board
            .set_scope(OwnershipScope::OwnedBy(EmployeeId::from("emp-1")))
            .unwrap();
        board.settle().await;
        assert_eq!((total(&board, "a"), total(&board, "b")), (1, 0));
        assert_eq!(board.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_scope_rejects_widening() {
        let store = ScriptedStore::seeded(&[("a", 3)]);
        let shared = Arc::new(store.clone());
        let identity = StaticIdentity::new(Some(EmployeeId::from("emp-1")), true);
        let mut board = KanbanBoard::new(
            PipelineId::from("p1"),
            BoardSettings::default(),
            shared.clone(),
            shared,
            &identity,
        );
        board.open().await.unwrap();
        board.settle().await;
        assert_eq!(total(&board, "a"), 0);
        assert!(matches!(
            board.set_scope(OwnershipScope::All),
            Err(BoardError::ScopeLocked)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_keeps_window_and_retry_recovers() {
        let store = ScriptedStore::seeded(&[("new", 45)]);
        let mut board = opened(&store).await;
        let mut events = board.subscribe();
        let new = StageId::from("new");

        store.fail_fetches(true);
        board.load_more(&new);
        board.settle().await;
        assert_eq!(loaded(&board, "new"), 20);
        assert!(board.column(&new).unwrap().last_error().is_some());
        assert!(matches!(
            events.try_recv().unwrap(),
            BoardEvent::Notice {
                level: NoticeLevel::Warning,
                ..
            }
        ));

        store.fail_fetches(false);
        assert!(board.retry(&new));
        board.settle().await;
        assert_eq!(loaded(&board, "new"), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_rejected_when_server_still_has_leads() {
        let store = ScriptedStore::seeded(&[("a", 3), ("b", 2)]);
        let mut board = opened(&store).await;

        // Filter hides stage b's leads, so it looks empty locally.
        board.set_search_input("a-");
        board.flush_search();
        board.settle().await;
        assert_eq!(loaded(&board, "b"), 0);

        let err = board.delete_stage(&StageId::from("b")).await.unwrap_err();
        assert!(matches!(err, BoardError::StageNotEmpty { remaining: 2, .. }));
        assert_eq!(board.stages().len(), 2);
        assert!(board.column(&StageId::from("b")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stage_admin_updates_local_list_after_store_confirms() {
        let store = ScriptedStore::seeded(&[("a", 1)]);
        let mut board = opened(&store).await;

        let created = board.create_stage("Won", Some("green".into())).await.unwrap();
        assert_eq!(created.order_index, 1);
        board.settle().await;
        assert_eq!(board.columns().len(), 2);

        let renamed = board.rename_stage(&created.id, "Closed").await.unwrap();
        assert_eq!(board.stages()[1].name, renamed.name);
        board.recolor_stage(&created.id, None).await.unwrap();
        assert_eq!(board.stages()[1].color, None);

        board.delete_stage(&created.id).await.unwrap();
        assert_eq!(board.stages().len(), 1);
        assert!(board.column(&created.id).is_none());

        store.fail_stage_writes(true);
        assert!(matches!(
            board.create_stage("Lost", None).await,
            Err(BoardError::StageMutationFailed { .. })
        ));
        assert_eq!(board.stages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_stage_is_rejected() {
        let store = ScriptedStore::seeded(&[("a", 1)]);
        let mut board = opened(&store).await;
        assert!(matches!(
            board.delete_stage(&StageId::from("zz")).await,
            Err(BoardError::UnknownStage { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_drives_commands() {
        let store = ScriptedStore::seeded(&[("a", 2), ("b", 1)]);
        let board = opened(&store).await;
        let mut events = board.subscribe();
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(board.run(rx));

        tx.send(BoardCommand::KeyboardPick(LeadId::from("a-000"))).await.unwrap();
        tx.send(BoardCommand::Release(DropTarget::Stage(StageId::from("b"))))
            .await
            .unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(event, BoardEvent::LeadRelocated { .. }));

        tx.send(BoardCommand::DeleteStage(StageId::from("b"))).await.unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            BoardEvent::Notice {
                level: NoticeLevel::Info,
                ..
            }
        ));

        tx.send(BoardCommand::Shutdown).await.unwrap();
        handle.await.unwrap();
    }
}
