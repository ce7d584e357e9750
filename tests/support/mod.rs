#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, Notify};
use uuid::Uuid;

use produktai::AppState;
use produktai::accounts::UserStore;
use produktai::billing::Reconciler;
use produktai::config::{AuthSettings, GenerationSettings};
use produktai::engine::{EngineError, GenerationRequest, ImageGenerator, RenderedImage};
use produktai::error::AppError;
use produktai::jobs::{JobStore, validate_dimensions};
use produktai::ledger::{Ledger, PlanGrant, USAGE_PERIOD_DAYS, ensure_positive};
use produktai::models::{
    GeneratedImage, GenerationJob, JobStatus, NewJob, NewTransaction, NewUser, PaymentStatus,
    PaymentTransaction, SubscriptionPlan, SubscriptionStatus, TransactionStatus, User,
};
use produktai::orchestrator::Orchestrator;
use produktai::payments::stripe::{parse_event, sign_payload, verify_signature};
use produktai::payments::{
    CheckoutRequest, CheckoutSession, CheckoutStatus, PaymentError, PaymentGateway, WebhookEvent,
};
use produktai::storage::{ImageStorage, StorageError};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";

pub fn generation_settings() -> GenerationSettings {
    GenerationSettings {
        cost: 4,
        images_per_job: 4,
        job_timeout: std::time::Duration::from_secs(15 * 60),
        recovery_interval: std::time::Duration::from_secs(60),
        retry_backoff: std::time::Duration::from_millis(1),
    }
}

pub fn auth_settings() -> AuthSettings {
    AuthSettings {
        jwt_secret: JWT_SECRET.to_string(),
        token_ttl: Duration::minutes(30),
        signup_credits: 12,
        bcrypt_cost: 4,
    }
}

// ---------------------------------------------------------------------------
// Accounts + ledger
// ---------------------------------------------------------------------------

/// Users live in one map; the ledger mutates them under the same lock, so every
/// balance change is atomic the way the guarded SQL update is.
#[derive(Default)]
pub struct MemoryAccounts {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryAccounts {
    pub fn insert(&self, email: &str, username: &str, credits: i32) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let user = User {
            id,
            email: email.to_string(),
            username: username.to_string(),
            password_hash: String::new(),
            credits,
            subscription_plan: SubscriptionPlan::None,
            subscription_status: SubscriptionStatus::Free,
            subscription_period_start: None,
            subscription_period_end: None,
            monthly_credits_used: 0,
            monthly_reset_date: Some(now + Duration::days(USAGE_PERIOD_DAYS)),
            created_at: now,
        };
        self.users.lock().unwrap().insert(id, user);
        id
    }

    pub fn user(&self, user_id: Uuid) -> User {
        self.users.lock().unwrap()[&user_id].clone()
    }

    pub fn credits(&self, user_id: Uuid) -> i32 {
        self.user(user_id).credits
    }

    pub fn set_reset_date(&self, user_id: Uuid, date: Option<DateTime<Utc>>) {
        if let Some(user) = self.users.lock().unwrap().get_mut(&user_id) {
            user.monthly_reset_date = date;
        }
    }
}

#[async_trait]
impl UserStore for MemoryAccounts {
    async fn create(&self, new: NewUser) -> Result<User, AppError> {
        let mut users = self.users.lock().unwrap();
        if users
            .values()
            .any(|u| u.email == new.email || u.username == new.username)
        {
            return Err(AppError::Conflict(
                "Email or username already registered".to_string(),
            ));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            username: new.username,
            password_hash: new.password_hash,
            credits: new.credits,
            subscription_plan: SubscriptionPlan::None,
            subscription_status: SubscriptionStatus::Free,
            subscription_period_start: None,
            subscription_period_end: None,
            monthly_credits_used: 0,
            monthly_reset_date: Some(new.monthly_reset_date),
            created_at: Utc::now(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.username == username).cloned())
    }
}

#[async_trait]
impl Ledger for MemoryAccounts {
    async fn balance(&self, user_id: Uuid) -> Result<i32, AppError> {
        let users = self.users.lock().unwrap();
        users
            .get(&user_id)
            .map(|u| u.credits)
            .ok_or(AppError::NotFound("user"))
    }

    async fn debit(&self, user_id: Uuid, amount: i32) -> Result<i32, AppError> {
        ensure_positive(amount)?;
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id).ok_or(AppError::NotFound("user"))?;
        if user.credits < amount {
            return Err(AppError::InsufficientCredits { required: amount });
        }
        user.credits -= amount;
        user.monthly_credits_used += amount;
        Ok(user.credits)
    }

    async fn credit(&self, user_id: Uuid, amount: i32) -> Result<i32, AppError> {
        ensure_positive(amount)?;
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id).ok_or(AppError::NotFound("user"))?;
        user.credits += amount;
        Ok(user.credits)
    }

    async fn set_plan(&self, user_id: Uuid, grant: &PlanGrant) -> Result<(), AppError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id).ok_or(AppError::NotFound("user"))?;
        let period_end = grant.now + grant.period;
        user.subscription_plan = grant.plan;
        user.subscription_status = SubscriptionStatus::Active;
        user.credits = grant.monthly_credits;
        user.monthly_credits_used = 0;
        user.subscription_period_start = Some(grant.now);
        user.subscription_period_end = Some(period_end);
        user.monthly_reset_date = Some(period_end);
        Ok(())
    }

    async fn roll_usage_period(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut users = self.users.lock().unwrap();
        let Some(user) = users.get_mut(&user_id) else {
            return Ok(false);
        };
        let due = user.monthly_reset_date.is_none_or(|date| date <= now);
        if due {
            user.monthly_credits_used = 0;
            user.monthly_reset_date = Some(now + Duration::days(USAGE_PERIOD_DAYS));
        }
        Ok(due)
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryJobs {
    jobs: Mutex<HashMap<Uuid, GenerationJob>>,
    fail_next_create: AtomicBool,
}

impl MemoryJobs {
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    pub fn job(&self, job_id: Uuid) -> GenerationJob {
        self.jobs.lock().unwrap()[&job_id].clone()
    }

    pub fn count_for(&self, user_id: Uuid) -> usize {
        let jobs = self.jobs.lock().unwrap();
        jobs.values().filter(|j| j.user_id == user_id).count()
    }

    /// Moves the creation time into the past, as if the job had been running that long.
    pub fn backdate(&self, job_id: Uuid, by: Duration) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&job_id) {
            job.created_at -= by;
        }
    }

    fn transition(
        &self,
        job_id: Uuid,
        apply: impl FnOnce(&mut GenerationJob),
    ) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(AppError::NotFound("job"))?;
        if job.status != JobStatus::Processing {
            return Err(AppError::InvalidTransition { job_id });
        }
        apply(job);
        job.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobs {
    async fn create(&self, new: NewJob) -> Result<GenerationJob, AppError> {
        validate_dimensions(new.width, new.height)?;
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(AppError::Internal("job store unavailable".to_string()));
        }
        let job = GenerationJob {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            prompt: new.prompt,
            negative_prompt: new.negative_prompt,
            width: new.width,
            height: new.height,
            status: JobStatus::Processing,
            images: Vec::new(),
            images_count: 0,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn complete(&self, job_id: Uuid, images: &[GeneratedImage]) -> Result<(), AppError> {
        self.transition(job_id, |job| {
            job.status = JobStatus::Completed;
            job.images = images.to_vec();
            job.images_count = images.len();
        })
    }

    async fn fail(&self, job_id: Uuid, reason: &str) -> Result<(), AppError> {
        self.transition(job_id, |job| {
            job.status = JobStatus::Failed;
            job.error_message = Some(reason.to_string());
        })
    }

    async fn get(&self, job_id: Uuid, user_id: Uuid) -> Result<GenerationJob, AppError> {
        let jobs = self.jobs.lock().unwrap();
        jobs.get(&job_id)
            .filter(|j| j.user_id == user_id)
            .cloned()
            .ok_or(AppError::NotFound("job"))
    }

    async fn list_completed(&self, user_id: Uuid, limit: i64) -> Result<Vec<GenerationJob>, AppError> {
        let jobs = self.jobs.lock().unwrap();
        let mut done: Vec<GenerationJob> = jobs
            .values()
            .filter(|j| j.user_id == user_id && j.status == JobStatus::Completed)
            .cloned()
            .collect();
        done.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        done.truncate(limit.max(0) as usize);
        Ok(done)
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<GenerationJob>, AppError> {
        let jobs = self.jobs.lock().unwrap();
        let mut stale: Vec<GenerationJob> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing && j.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryTransactions {
    by_session: Mutex<HashMap<String, PaymentTransaction>>,
    claims: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryTransactions {
    pub fn get(&self, session_id: &str) -> Option<PaymentTransaction> {
        self.by_session.lock().unwrap().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_session.lock().unwrap().len()
    }

    pub fn is_claimed(&self, session_id: &str) -> bool {
        self.claims.lock().unwrap().contains_key(session_id)
    }

    /// Ages an existing claim, as if its holder stalled `by` ago.
    pub fn backdate_claim(&self, session_id: &str, by: Duration) {
        if let Some(at) = self.claims.lock().unwrap().get_mut(session_id) {
            *at = *at - by;
        }
    }
}

#[async_trait]
impl produktai::transactions::TransactionStore for MemoryTransactions {
    async fn create(&self, new: NewTransaction) -> Result<PaymentTransaction, AppError> {
        let tx = PaymentTransaction {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            session_id: new.session_id,
            amount_cents: new.amount_cents,
            currency: new.currency,
            status: TransactionStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            subscription_plan: new.subscription_plan,
            metadata: new.metadata,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.by_session
            .lock()
            .unwrap()
            .insert(tx.session_id.clone(), tx.clone());
        Ok(tx)
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<PaymentTransaction>, AppError> {
        Ok(self.get(session_id))
    }

    async fn claim(&self, session_id: &str, stale_before: DateTime<Utc>) -> Result<bool, AppError> {
        let txs = self.by_session.lock().unwrap();
        let mut claims = self.claims.lock().unwrap();
        match txs.get(session_id) {
            Some(tx) if tx.payment_status != PaymentStatus::Paid => {
                if claims.get(session_id).is_some_and(|at| *at >= stale_before) {
                    return Ok(false);
                }
                claims.insert(session_id.to_string(), Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_claim(&self, session_id: &str) -> Result<(), AppError> {
        self.claims.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn mark_paid(&self, session_id: &str) -> Result<bool, AppError> {
        let mut txs = self.by_session.lock().unwrap();
        self.claims.lock().unwrap().remove(session_id);
        match txs.get_mut(session_id) {
            Some(tx) if tx.payment_status != PaymentStatus::Paid => {
                tx.status = TransactionStatus::Completed;
                tx.payment_status = PaymentStatus::Paid;
                tx.updated_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_unpaid_outcome(
        &self,
        session_id: &str,
        status: TransactionStatus,
        payment_status: PaymentStatus,
    ) -> Result<bool, AppError> {
        let mut txs = self.by_session.lock().unwrap();
        match txs.get_mut(session_id) {
            Some(tx) if tx.payment_status == PaymentStatus::Unpaid => {
                tx.status = status;
                tx.payment_status = payment_status;
                tx.updated_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Image engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Step {
    /// Return this many images (capped at the requested count).
    Images(usize),
    Transient,
    Permanent,
    Panic,
}

/// Plays back a fixed script of vendor responses. Once the script runs out
/// every call is a permanent error.
#[derive(Default)]
pub struct ScriptedGenerator {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Always returns the full requested batch.
    pub fn generous() -> Self {
        Self::new(std::iter::repeat_n(Step::Images(usize::MAX), 64))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageGenerator for ScriptedGenerator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<RenderedImage>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let step = self.steps.lock().unwrap().pop_front();

        match step {
            Some(Step::Images(n)) => Ok((0..n.min(request.count as usize))
                .map(|i| RenderedImage {
                    bytes: format!("image-{i}").into_bytes(),
                    mime_type: "image/png".to_string(),
                })
                .collect()),
            Some(Step::Transient) => Err(EngineError::Transient(
                "Budget has been exceeded".to_string(),
            )),
            Some(Step::Permanent) | None => {
                Err(EngineError::Permanent("invalid argument".to_string()))
            }
            Some(Step::Panic) => panic!("vendor SDK blew up"),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
    puts: AtomicUsize,
    failing_puts: Mutex<HashSet<usize>>,
}

impl MemoryStorage {
    /// Makes the n-th upload (1-based) fail.
    pub fn fail_put(&self, n: usize) {
        self.failing_puts.lock().unwrap().insert(n);
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ImageStorage for MemoryStorage {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_puts.lock().unwrap().contains(&n) {
            return Err(StorageError(format!("upload {n} refused")));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(format!("https://cdn.test/{key}"))
    }
}

// ---------------------------------------------------------------------------
// Payment processor
// ---------------------------------------------------------------------------

/// Checkout sessions kept in memory. Webhooks go through the real Stripe
/// signature check with `WEBHOOK_SECRET`.
#[derive(Default)]
pub struct FakeGateway {
    sessions: Mutex<HashMap<String, CheckoutStatus>>,
    requests: Mutex<Vec<CheckoutRequest>>,
    next_id: AtomicUsize,
    unavailable: AtomicBool,
    status_gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl FakeGateway {
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn mark_paid(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
            session.status = "complete".to_string();
            session.payment_status = "paid".to_string();
        }
    }

    /// Parks every later status lookup until the second `Notify` fires. The first
    /// one is signalled when a lookup has arrived and is waiting.
    pub fn hold_status_lookups(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.status_gate.lock().unwrap() = Some((entered.clone(), release.clone()));
        (entered, release)
    }

    pub fn last_request(&self) -> Option<CheckoutRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn check_available(&self) -> Result<(), PaymentError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PaymentError::Api {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        self.check_available()?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = format!("cs_test_{n}");
        self.sessions.lock().unwrap().insert(
            session_id.clone(),
            CheckoutStatus {
                session_id: session_id.clone(),
                status: "open".to_string(),
                payment_status: "unpaid".to_string(),
                amount_total: request.amount_cents,
                currency: request.currency.clone(),
            },
        );
        self.requests.lock().unwrap().push(request.clone());
        Ok(CheckoutSession {
            url: format!("https://checkout.stripe.test/{session_id}"),
            session_id,
        })
    }

    async fn get_checkout_status(&self, session_id: &str) -> Result<CheckoutStatus, PaymentError> {
        self.check_available()?;
        let gate = self.status_gate.lock().unwrap().clone();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| PaymentError::Api {
                status: 404,
                body: "No such checkout.session".to_string(),
            })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookEvent, PaymentError> {
        let header = signature.ok_or_else(|| PaymentError::Signature("missing header".into()))?;
        verify_signature(WEBHOOK_SECRET, payload, header, Utc::now().timestamp(), 300)?;
        parse_event(payload)
    }
}

/// `Stripe-Signature` value for `payload`, signed now with `WEBHOOK_SECRET`.
pub fn signature_header(payload: &[u8]) -> String {
    let timestamp = Utc::now().timestamp();
    format!("t={timestamp},v1={}", sign_payload(WEBHOOK_SECRET, timestamp, payload))
}

pub fn checkout_event(event_type: &str, session_id: &str, payment_status: &str) -> Vec<u8> {
    serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": { "object": {
            "id": session_id,
            "object": "checkout.session",
            "payment_status": payment_status
        }}
    })
    .to_string()
    .into_bytes()
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub accounts: Arc<MemoryAccounts>,
    pub jobs: Arc<MemoryJobs>,
    pub transactions: Arc<MemoryTransactions>,
    pub engine: Arc<ScriptedGenerator>,
    pub storage: Arc<MemoryStorage>,
    pub gateway: Arc<FakeGateway>,
    pub orchestrator: Orchestrator,
    pub reconciler: Reconciler,
}

impl TestApp {
    pub fn new(engine: ScriptedGenerator) -> Self {
        let accounts = Arc::new(MemoryAccounts::default());
        let jobs = Arc::new(MemoryJobs::default());
        let transactions = Arc::new(MemoryTransactions::default());
        let engine = Arc::new(engine);
        let storage = Arc::new(MemoryStorage::default());
        let gateway = Arc::new(FakeGateway::default());

        let orchestrator = Orchestrator::new(
            accounts.clone(),
            jobs.clone(),
            engine.clone(),
            storage.clone(),
            generation_settings(),
        );
        let reconciler = Reconciler::new(accounts.clone(), transactions.clone(), gateway.clone());

        Self {
            accounts,
            jobs,
            transactions,
            engine,
            storage,
            gateway,
            orchestrator,
            reconciler,
        }
    }

    pub fn add_user(&self, credits: i32) -> Uuid {
        let tag = Uuid::new_v4().simple().to_string();
        self.accounts
            .insert(&format!("{tag}@shop.test"), &format!("user_{tag}"), credits)
    }

    pub fn credits(&self, user_id: Uuid) -> i32 {
        self.accounts.credits(user_id)
    }

    pub fn state(&self) -> AppState {
        AppState {
            users: self.accounts.clone(),
            ledger: self.accounts.clone(),
            jobs: self.jobs.clone(),
            orchestrator: self.orchestrator.clone(),
            reconciler: self.reconciler.clone(),
            auth: auth_settings(),
        }
    }
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

fn split_db_url(url: &str) -> Result<(String, String), String> {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base.to_string(), Some(query)),
        None => (url.to_string(), None),
    };

    let db_start = base
        .rfind('/')
        .ok_or_else(|| "invalid database url".to_string())?;
    if db_start + 1 >= base.len() {
        return Err("database name is empty".to_string());
    }

    let db_name = base[db_start + 1..].to_string();
    let mut admin_url = format!("{}postgres", &base[..db_start + 1]);
    if let Some(query) = query {
        admin_url = format!("{admin_url}?{query}");
    }

    Ok((admin_url, db_name))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

static TEST_DB_LOCK: OnceLock<AsyncMutex<()>> = OnceLock::new();

pub struct TestDb {
    pub pool: PgPool,
    _guard: AsyncMutexGuard<'static, ()>,
}

/// Fresh, migrated database, or `None` when `TEST_DATABASE_URL` is not set.
pub async fn init_test_db() -> Option<TestDb> {
    dotenvy::dotenv().ok();
    let Ok(test_url) = env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping postgres test");
        return None;
    };
    let (admin_url, db_name) =
        split_db_url(&test_url).expect("invalid TEST_DATABASE_URL format");

    let lock = TEST_DB_LOCK.get_or_init(|| AsyncMutex::new(()));
    let guard = lock.lock().await;

    let admin_pool = PgPool::connect(&admin_url)
        .await
        .expect("connect admin db");

    let quoted_name = quote_identifier(&db_name);
    let drop_sql = format!("DROP DATABASE IF EXISTS {quoted_name} WITH (FORCE)");
    let create_sql = format!("CREATE DATABASE {quoted_name}");

    let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
    sqlx::query(&create_sql)
        .execute(&admin_pool)
        .await
        .expect("create test db");
    admin_pool.close().await;

    let pool = produktai::db::connect(&test_url)
        .await
        .expect("connect test db");
    Some(TestDb { pool, _guard: guard })
}
