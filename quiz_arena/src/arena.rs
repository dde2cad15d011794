//! Service wiring over one store implementation.

use crate::config::ArenaConfig;
use crate::db::{
    LedgerRepository, LeaderboardRepository, ProfileRepository, QuestionBank, SessionRepository,
    StreakFreezeRepository, TournamentRepository,
};
use crate::events::EventBus;
use crate::leaderboard::LeaderboardAggregator;
use crate::session::DailySessionService;
use crate::streak::{FreezeShop, StreakEngine};
use crate::tournament::{TournamentManager, TournamentOrchestrator, TournamentScheduler};
use crate::wallet::WalletManager;
use std::sync::Arc;

/// Every arena service, sharing one wallet (and its per-user locks), one
/// leaderboard rank lock and one event bus
#[derive(Clone)]
pub struct Arena {
    pub config: ArenaConfig,
    pub profiles: Arc<dyn ProfileRepository>,
    pub events: Arc<dyn EventBus>,
    pub wallet: WalletManager,
    pub leaderboard: LeaderboardAggregator,
    pub streaks: StreakEngine,
    pub freezes: FreezeShop,
    pub sessions: DailySessionService,
    pub tournaments: TournamentManager,
    pub orchestrator: Arc<TournamentOrchestrator>,
}

impl Arena {
    /// Build every service on top of `store`
    pub fn new<S>(store: Arc<S>, events: Arc<dyn EventBus>, config: ArenaConfig) -> Self
    where
        S: TournamentRepository
            + LeaderboardRepository
            + ProfileRepository
            + StreakFreezeRepository
            + LedgerRepository
            + SessionRepository
            + QuestionBank
            + 'static,
    {
        let wallet = WalletManager::new(store.clone());
        let leaderboard = LeaderboardAggregator::new(store.clone());
        let streaks = StreakEngine::new(store.clone(), store.clone(), config.streak.clone());
        let freezes = FreezeShop::new(
            wallet.clone(),
            store.clone(),
            config.freeze_price,
            config.freeze_validity,
        );
        let sessions = DailySessionService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            streaks.clone(),
            wallet.clone(),
            leaderboard.clone(),
            config.daily_questions,
            config.min_daily_questions,
        );
        let tournaments =
            TournamentManager::new(store.clone(), store.clone(), wallet.clone(), events.clone());
        let orchestrator = Arc::new(TournamentOrchestrator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            wallet.clone(),
            leaderboard.clone(),
            events.clone(),
            config.clone(),
        ));

        Self {
            config,
            profiles: store,
            events,
            wallet,
            leaderboard,
            streaks,
            freezes,
            sessions,
            tournaments,
            orchestrator,
        }
    }

    /// A scheduler driving this arena's tournaments
    pub fn scheduler(&self) -> Arc<TournamentScheduler> {
        Arc::new(TournamentScheduler::new(Arc::clone(&self.orchestrator)))
    }
}
