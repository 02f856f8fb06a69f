/// Credential store over SQLite
///
/// Exclusively owns persisted account rows and single-use token records.
/// Correctness under concurrency rests on the unique email index over live
/// rows and the conditional update used to consume one-time tokens. Every
/// call is wrapped in a timeout: 5s for lookups, 10s for writes.
use crate::{
    account::{Account, AccountDraft, AccountPatch, AccountStatus, SearchParams},
    error::{ServiceError, ServiceResult},
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, SqlitePool};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

const ACCOUNT_COLUMNS: &str = "id, branch_id, owner_id, name, email, avatar, title, role, status, \
     password_hash, email_verified, refresh_generation, created_at, updated_at";

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// Repository for accounts and one-time tokens
pub struct AccountRepository {
    db: SqlitePool,
}

impl AccountRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    // --- accounts --------------------------------------------------------

    /// Insert an account with admin-chosen role and status.
    /// Fails with DuplicateEmail if a live row already holds the email.
    pub async fn create_user(&self, draft: &AccountDraft) -> ServiceResult<Account> {
        self.insert_account(draft).await
    }

    /// Insert a self-registered account. The draft carries the
    /// administrative defaults chosen by the service.
    pub async fn register(&self, draft: &AccountDraft) -> ServiceResult<Account> {
        self.insert_account(draft).await
    }

    async fn insert_account(&self, draft: &AccountDraft) -> ServiceResult<Account> {
        let now = Utc::now();

        let result = write(
            sqlx::query(
                "INSERT INTO account (branch_id, owner_id, name, email, avatar, title, role, \
                 status, password_hash, email_verified, refresh_generation, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, 0, ?10, ?10)",
            )
            .bind(draft.branch_id)
            .bind(draft.owner_id)
            .bind(&draft.name)
            .bind(&draft.email)
            .bind(&draft.avatar)
            .bind(&draft.title)
            .bind(draft.role.as_str())
            .bind(draft.status.as_str())
            .bind(&draft.password_hash)
            .bind(now)
            .execute(&self.db),
        )
        .await?
        .map_err(map_unique_violation)?;

        let id = result.last_insert_rowid();
        self.find_by_id(id).await
    }

    /// Find a live account by id
    pub async fn find_by_id(&self, id: i64) -> ServiceResult<Account> {
        let row = lookup(
            sqlx::query(&format!(
                "SELECT {} FROM account WHERE id = ?1 AND deleted_at IS NULL",
                ACCOUNT_COLUMNS
            ))
            .bind(id)
            .fetch_optional(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?
        .ok_or_else(|| ServiceError::NotFound("account not found".to_string()))?;

        account_from_row(&row)
    }

    /// Find a live account by email. Callers pass the normalized
    /// (lowercased) form; stored emails are normalized on write.
    pub async fn find_by_email(&self, email: &str) -> ServiceResult<Account> {
        let row = lookup(
            sqlx::query(&format!(
                "SELECT {} FROM account WHERE email = ?1 AND deleted_at IS NULL",
                ACCOUNT_COLUMNS
            ))
            .bind(email)
            .fetch_optional(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?
        .ok_or_else(|| ServiceError::NotFound("account not found".to_string()))?;

        account_from_row(&row)
    }

    /// Whether a live account holds the email. Never fails on absence.
    pub async fn exists_by_email(&self, email: &str) -> ServiceResult<bool> {
        let count: i64 = lookup(
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM account WHERE email = ?1 AND deleted_at IS NULL",
            )
            .bind(email)
            .fetch_one(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?;

        Ok(count > 0)
    }

    /// Partial update; only populated patch fields overwrite
    pub async fn update_user(&self, patch: &AccountPatch) -> ServiceResult<Account> {
        let current = self.find_by_id(patch.id).await?;
        let now = Utc::now();

        write(
            sqlx::query(
                "UPDATE account SET branch_id = ?1, owner_id = ?2, name = ?3, email = ?4, \
                 avatar = ?5, title = ?6, role = ?7, updated_at = ?8 \
                 WHERE id = ?9 AND deleted_at IS NULL",
            )
            .bind(patch.branch_id.unwrap_or(current.branch_id))
            .bind(patch.owner_id.unwrap_or(current.owner_id))
            .bind(patch.name.as_deref().unwrap_or(&current.name))
            .bind(patch.email.as_deref().unwrap_or(&current.email))
            .bind(patch.avatar.as_deref().unwrap_or(&current.avatar))
            .bind(patch.title.as_deref().unwrap_or(&current.title))
            .bind(patch.role.unwrap_or(current.role).as_str())
            .bind(now)
            .bind(patch.id)
            .execute(&self.db),
        )
        .await?
        .map_err(map_unique_violation)?;

        self.find_by_id(patch.id).await
    }

    /// Tombstone an account. The email becomes reusable since uniqueness
    /// only covers live rows.
    pub async fn delete_user(&self, id: i64) -> ServiceResult<()> {
        let result = write(
            sqlx::query(
                "UPDATE account SET deleted_at = ?1, updated_at = ?1 \
                 WHERE id = ?2 AND deleted_at IS NULL",
            )
            .bind(Utc::now())
            .bind(id)
            .execute(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("account not found".to_string()));
        }

        Ok(())
    }

    /// Atomically replace the stored password hash
    pub async fn update_password(&self, id: i64, new_hash: &str) -> ServiceResult<()> {
        let result = write(
            sqlx::query(
                "UPDATE account SET password_hash = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND deleted_at IS NULL",
            )
            .bind(new_hash)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("account not found".to_string()));
        }

        Ok(())
    }

    /// Set the account status
    pub async fn update_status(&self, id: i64, status: AccountStatus) -> ServiceResult<()> {
        let result = write(
            sqlx::query(
                "UPDATE account SET status = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND deleted_at IS NULL",
            )
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("account not found".to_string()));
        }

        Ok(())
    }

    /// Mark the email verified; a pending account becomes active in the
    /// same row update
    pub async fn mark_verified(&self, email: &str) -> ServiceResult<()> {
        let result = write(
            sqlx::query(
                "UPDATE account SET email_verified = 1, \
                 status = CASE WHEN status = 'pending' THEN 'active' ELSE status END, \
                 updated_at = ?1 \
                 WHERE email = ?2 AND deleted_at IS NULL",
            )
            .bind(Utc::now())
            .bind(email)
            .execute(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("account not found".to_string()));
        }

        Ok(())
    }

    /// Advance the refresh-token generation and return the new value.
    /// Every previously minted refresh token for the account is dead after
    /// this. Bump and read happen in one statement, so two concurrent
    /// advances can never observe the same generation.
    pub async fn advance_refresh_generation(&self, id: i64) -> ServiceResult<i64> {
        let generation: Option<i64> = write(
            sqlx::query_scalar(
                "UPDATE account SET refresh_generation = refresh_generation + 1 \
                 WHERE id = ?1 AND deleted_at IS NULL \
                 RETURNING refresh_generation",
            )
            .bind(id)
            .fetch_optional(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?;

        generation.ok_or_else(|| ServiceError::NotFound("account not found".to_string()))
    }

    // --- one-time tokens -------------------------------------------------

    /// Store a password-reset token record
    pub async fn store_reset_token(
        &self,
        email: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> ServiceResult<()> {
        self.store_one_time_token(email, token, "reset", expires_at)
            .await
    }

    /// Store a verification token record. Any prior unconsumed verification
    /// token for the same email is invalidated: at most one is outstanding.
    pub async fn store_verification_token(
        &self,
        email: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> ServiceResult<()> {
        write(
            sqlx::query(
                "DELETE FROM one_time_token \
                 WHERE email = ?1 AND purpose = 'verify' AND consumed_at IS NULL",
            )
            .bind(email)
            .execute(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?;

        self.store_one_time_token(email, token, "verify", expires_at)
            .await
    }

    async fn store_one_time_token(
        &self,
        email: &str,
        token: &str,
        purpose: &str,
        expires_at: DateTime<Utc>,
    ) -> ServiceResult<()> {
        write(
            sqlx::query(
                "INSERT INTO one_time_token (token, email, purpose, created_at, expires_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(token)
            .bind(email)
            .bind(purpose)
            .bind(Utc::now())
            .bind(expires_at)
            .execute(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?;

        Ok(())
    }

    /// Consume a reset token, returning the email it authorizes
    pub async fn validate_reset_token(&self, token: &str) -> ServiceResult<String> {
        self.consume_one_time_token(token, "reset").await
    }

    /// Consume a verification token, returning the email it authorizes
    pub async fn validate_verification_token(&self, token: &str) -> ServiceResult<String> {
        self.consume_one_time_token(token, "verify").await
    }

    /// Atomic consume-on-read. The conditional update on `consumed_at IS
    /// NULL` guarantees a concurrent second use observes InvalidToken.
    async fn consume_one_time_token(&self, token: &str, purpose: &str) -> ServiceResult<String> {
        let now = Utc::now();

        let row = lookup(
            sqlx::query(
                "SELECT email, expires_at, consumed_at FROM one_time_token \
                 WHERE token = ?1 AND purpose = ?2",
            )
            .bind(token)
            .bind(purpose)
            .fetch_optional(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?
        .ok_or(ServiceError::InvalidToken)?;

        let email: String = row.try_get("email").map_err(ServiceError::Database)?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at").map_err(ServiceError::Database)?;
        let consumed_at: Option<DateTime<Utc>> =
            row.try_get("consumed_at").map_err(ServiceError::Database)?;

        if consumed_at.is_some() {
            return Err(ServiceError::InvalidToken);
        }
        if now > expires_at {
            return Err(ServiceError::ExpiredToken);
        }

        let result = write(
            sqlx::query(
                "UPDATE one_time_token SET consumed_at = ?1 \
                 WHERE token = ?2 AND consumed_at IS NULL",
            )
            .bind(now)
            .bind(token)
            .execute(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?;

        // A concurrent consumer got there first
        if result.rows_affected() == 0 {
            return Err(ServiceError::InvalidToken);
        }

        Ok(email)
    }

    // --- list / search ---------------------------------------------------

    /// All live accounts, newest first, paginated
    pub async fn find_all(&self, page: u32, page_size: u32) -> ServiceResult<Vec<Account>> {
        let (limit, offset) = page_bounds(page, page_size);

        let rows = lookup(
            sqlx::query(&format!(
                "SELECT {} FROM account WHERE deleted_at IS NULL \
                 ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                ACCOUNT_COLUMNS
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?;

        rows.iter().map(account_from_row).collect()
    }

    /// Live accounts in a branch, newest first
    pub async fn find_by_branch(&self, branch_id: i64) -> ServiceResult<Vec<Account>> {
        let rows = lookup(
            sqlx::query(&format!(
                "SELECT {} FROM account WHERE branch_id = ?1 AND deleted_at IS NULL \
                 ORDER BY created_at DESC",
                ACCOUNT_COLUMNS
            ))
            .bind(branch_id)
            .fetch_all(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?;

        rows.iter().map(account_from_row).collect()
    }

    /// Live accounts holding a role, newest first
    pub async fn find_by_role(&self, role: &str) -> ServiceResult<Vec<Account>> {
        let rows = lookup(
            sqlx::query(&format!(
                "SELECT {} FROM account WHERE role = ?1 AND deleted_at IS NULL \
                 ORDER BY created_at DESC",
                ACCOUNT_COLUMNS
            ))
            .bind(role)
            .fetch_all(&self.db),
        )
        .await?
        .map_err(ServiceError::Database)?;

        rows.iter().map(account_from_row).collect()
    }

    /// Filtered search with pagination and sorting
    pub async fn search(&self, params: &SearchParams) -> ServiceResult<Vec<Account>> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM account WHERE deleted_at IS NULL",
            ACCOUNT_COLUMNS
        ));

        if let Some(q) = params.q.as_deref().filter(|q| !q.is_empty()) {
            let pattern = format!("%{}%", q);
            builder.push(" AND (name LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR email LIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }
        if let Some(role) = params.role.as_deref().filter(|r| !r.is_empty()) {
            builder.push(" AND role = ");
            builder.push_bind(role.to_string());
        }
        if let Some(branch_id) = params.branch_id {
            builder.push(" AND branch_id = ");
            builder.push_bind(branch_id);
        }
        if let Some(status) = params.status.as_deref().filter(|s| !s.is_empty()) {
            builder.push(" AND status = ");
            builder.push_bind(status.to_string());
        }

        // Sort columns are whitelisted; anything else falls back to created_at
        let sort_by = match params.sort_by.as_deref() {
            Some("name") => "name",
            Some("email") => "email",
            Some("updated_at") => "updated_at",
            _ => "created_at",
        };
        let sort_order = match params.sort_order.as_deref() {
            Some("asc") => "ASC",
            _ => "DESC",
        };
        builder.push(format!(" ORDER BY {} {}", sort_by, sort_order));

        let (limit, offset) = page_bounds(
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        );
        builder.push(" LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let rows = lookup(builder.build().fetch_all(&self.db))
            .await?
            .map_err(ServiceError::Database)?;

        rows.iter().map(account_from_row).collect()
    }
}

fn page_bounds(page: u32, page_size: u32) -> (i64, i64) {
    let page = page.max(1) as i64;
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE) as i64;
    (page_size, (page - 1) * page_size)
}

async fn lookup<T, F>(fut: F) -> ServiceResult<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(LOOKUP_TIMEOUT, fut)
        .await
        .map_err(|_| ServiceError::Internal("database lookup timed out".to_string()))
}

async fn write<T, F>(fut: F) -> ServiceResult<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(WRITE_TIMEOUT, fut)
        .await
        .map_err(|_| ServiceError::Internal("database write timed out".to_string()))
}

fn map_unique_violation(e: sqlx::Error) -> ServiceError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            return ServiceError::DuplicateEmail;
        }
    }
    ServiceError::Database(e)
}

fn account_from_row(row: &SqliteRow) -> ServiceResult<Account> {
    let role_str: String = row.try_get("role").map_err(ServiceError::Database)?;
    let status_str: String = row.try_get("status").map_err(ServiceError::Database)?;

    Ok(Account {
        id: row.try_get("id").map_err(ServiceError::Database)?,
        branch_id: row.try_get("branch_id").map_err(ServiceError::Database)?,
        owner_id: row.try_get("owner_id").map_err(ServiceError::Database)?,
        name: row.try_get("name").map_err(ServiceError::Database)?,
        email: row.try_get("email").map_err(ServiceError::Database)?,
        avatar: row.try_get("avatar").map_err(ServiceError::Database)?,
        title: row.try_get("title").map_err(ServiceError::Database)?,
        role: crate::account::Role::from_str(&role_str).map_err(ServiceError::Internal)?,
        status: AccountStatus::from_str(&status_str).map_err(ServiceError::Internal)?,
        password_hash: row.try_get("password_hash").map_err(ServiceError::Database)?,
        email_verified: row.try_get("email_verified").map_err(ServiceError::Database)?,
        refresh_generation: row
            .try_get("refresh_generation")
            .map_err(ServiceError::Database)?,
        created_at: row.try_get("created_at").map_err(ServiceError::Database)?,
        updated_at: row.try_get("updated_at").map_err(ServiceError::Database)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Role;
    use chrono::Duration;

    async fn test_repo() -> AccountRepository {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::run_migrations(&db).await.unwrap();
        AccountRepository::new(db)
    }

    fn draft(email: &str) -> AccountDraft {
        AccountDraft {
            branch_id: 1,
            owner_id: 1,
            name: "Alice".to_string(),
            email: email.to_string(),
            avatar: String::new(),
            title: "Barista".to_string(),
            role: Role::User,
            status: AccountStatus::Pending,
            password_hash: "$argon2id$fake-hash".to_string(),
        }
    }

    #[tokio::test]
    async fn create_and_find() {
        let repo = test_repo().await;
        let account = repo.register(&draft("alice@example.com")).await.unwrap();
        assert!(account.id > 0);
        assert_eq!(account.status, AccountStatus::Pending);
        assert!(!account.email_verified);

        let by_id = repo.find_by_id(account.id).await.unwrap();
        assert_eq!(by_id.email, "alice@example.com");

        let by_email = repo.find_by_email("alice@example.com").await.unwrap();
        assert_eq!(by_email.id, account.id);
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let repo = test_repo().await;
        repo.register(&draft("alice@example.com")).await.unwrap();
        let result = repo.register(&draft("alice@example.com")).await;
        assert!(matches!(result, Err(ServiceError::DuplicateEmail)));
    }

    #[tokio::test]
    async fn tombstone_frees_email_and_is_not_idempotent_on_first_miss() {
        let repo = test_repo().await;
        let account = repo.register(&draft("alice@example.com")).await.unwrap();

        repo.delete_user(account.id).await.unwrap();
        assert!(matches!(
            repo.find_by_id(account.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            repo.delete_user(account.id).await,
            Err(ServiceError::NotFound(_))
        ));

        // Email is unique among live rows only
        repo.register(&draft("alice@example.com")).await.unwrap();
    }

    #[tokio::test]
    async fn partial_update_only_touches_populated_fields() {
        let repo = test_repo().await;
        let account = repo.register(&draft("alice@example.com")).await.unwrap();

        let updated = repo
            .update_user(&AccountPatch {
                id: account.id,
                name: Some("Alice Cooper".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.name, "Alice Cooper");
        assert_eq!(updated.email, "alice@example.com");
        assert_eq!(updated.title, "Barista");
    }

    #[tokio::test]
    async fn update_cannot_steal_email() {
        let repo = test_repo().await;
        repo.register(&draft("alice@example.com")).await.unwrap();
        let bob = repo.register(&draft("bob@example.com")).await.unwrap();

        let result = repo
            .update_user(&AccountPatch {
                id: bob.id,
                email: Some("alice@example.com".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(ServiceError::DuplicateEmail)));
    }

    #[tokio::test]
    async fn mark_verified_activates_pending() {
        let repo = test_repo().await;
        let account = repo.register(&draft("alice@example.com")).await.unwrap();
        assert_eq!(account.status, AccountStatus::Pending);

        repo.mark_verified("alice@example.com").await.unwrap();
        let account = repo.find_by_id(account.id).await.unwrap();
        assert!(account.email_verified);
        assert_eq!(account.status, AccountStatus::Active);

        // A suspended account stays suspended when re-verified
        repo.update_status(account.id, AccountStatus::Suspended)
            .await
            .unwrap();
        repo.mark_verified("alice@example.com").await.unwrap();
        let account = repo.find_by_id(account.id).await.unwrap();
        assert_eq!(account.status, AccountStatus::Suspended);
    }

    #[tokio::test]
    async fn mark_verified_reports_missing_accounts() {
        let repo = test_repo().await;
        let account = repo.register(&draft("alice@example.com")).await.unwrap();

        assert!(matches!(
            repo.mark_verified("ghost@example.com").await,
            Err(ServiceError::NotFound(_))
        ));

        // A tombstoned account no longer verifies
        repo.delete_user(account.id).await.unwrap();
        assert!(matches!(
            repo.mark_verified("alice@example.com").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn refresh_generation_advances() {
        let repo = test_repo().await;
        let account = repo.register(&draft("alice@example.com")).await.unwrap();
        assert_eq!(account.refresh_generation, 0);

        assert_eq!(repo.advance_refresh_generation(account.id).await.unwrap(), 1);
        assert_eq!(repo.advance_refresh_generation(account.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn one_time_token_consumed_exactly_once() {
        let repo = test_repo().await;
        let expires = Utc::now() + Duration::hours(1);
        repo.store_reset_token("alice@example.com", "tok-1", expires)
            .await
            .unwrap();

        let email = repo.validate_reset_token("tok-1").await.unwrap();
        assert_eq!(email, "alice@example.com");

        assert!(matches!(
            repo.validate_reset_token("tok-1").await,
            Err(ServiceError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn unknown_and_wrong_purpose_tokens_are_invalid() {
        let repo = test_repo().await;
        let expires = Utc::now() + Duration::hours(1);
        repo.store_reset_token("alice@example.com", "tok-1", expires)
            .await
            .unwrap();

        assert!(matches!(
            repo.validate_reset_token("missing").await,
            Err(ServiceError::InvalidToken)
        ));
        // A reset token is not a verification token
        assert!(matches!(
            repo.validate_verification_token("tok-1").await,
            Err(ServiceError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn expired_token_reports_expiry() {
        let repo = test_repo().await;
        let expires = Utc::now() - Duration::minutes(1);
        repo.store_reset_token("alice@example.com", "tok-1", expires)
            .await
            .unwrap();

        assert!(matches!(
            repo.validate_reset_token("tok-1").await,
            Err(ServiceError::ExpiredToken)
        ));
    }

    #[tokio::test]
    async fn new_verification_token_retires_the_old_one() {
        let repo = test_repo().await;
        let expires = Utc::now() + Duration::hours(24);
        repo.store_verification_token("alice@example.com", "v-1", expires)
            .await
            .unwrap();
        repo.store_verification_token("alice@example.com", "v-2", expires)
            .await
            .unwrap();

        assert!(matches!(
            repo.validate_verification_token("v-1").await,
            Err(ServiceError::InvalidToken)
        ));
        assert_eq!(
            repo.validate_verification_token("v-2").await.unwrap(),
            "alice@example.com"
        );
    }

    #[tokio::test]
    async fn search_filters_and_paginates() {
        let repo = test_repo().await;
        for i in 0..5 {
            let mut d = draft(&format!("user{}@example.com", i));
            d.branch_id = if i < 3 { 1 } else { 2 };
            d.name = format!("User {}", i);
            repo.register(&d).await.unwrap();
        }

        let branch_one = repo
            .search(&SearchParams {
                branch_id: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(branch_one.len(), 3);

        let by_name = repo
            .search(&SearchParams {
                q: Some("User 4".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].email, "user4@example.com");

        let page = repo
            .search(&SearchParams {
                page: Some(2),
                page_size: Some(2),
                sort_by: Some("email".to_string()),
                sort_order: Some("asc".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].email, "user2@example.com");
    }

    #[tokio::test]
    async fn pagination_survives_extreme_page_numbers() {
        let repo = test_repo().await;
        repo.register(&draft("alice@example.com")).await.unwrap();

        let rows = repo
            .search(&SearchParams {
                page: Some(u32::MAX),
                page_size: Some(100),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(rows.is_empty());

        let rows = repo.find_all(u32::MAX, u32::MAX).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn find_by_role_and_branch() {
        let repo = test_repo().await;
        let mut admin = draft("admin@example.com");
        admin.role = Role::Admin;
        repo.register(&admin).await.unwrap();
        repo.register(&draft("user@example.com")).await.unwrap();

        let admins = repo.find_by_role("admin").await.unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].email, "admin@example.com");

        let branch = repo.find_by_branch(1).await.unwrap();
        assert_eq!(branch.len(), 2);
    }
}
