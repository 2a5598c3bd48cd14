use std::{borrow::Cow, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgRow},
    types::Json,
    Connection, PgPool, Row,
};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::{
    Business, BusinessLocation, ContactInfo, Review, SubscriptionStatus, UserProfile,
};

/// How many times a conflicting review write is retried before giving up.
const MUTATE_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = match PgPoolOptions::new()
            .max_connections(10)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Some(Duration::from_secs(600)))
            .test_before_acquire(true)
            .connect(database_url)
            .await
        {
            Ok(pool) => pool,
            Err(sqlx::Error::Database(db_err)) if db_err.code() == Some(Cow::Borrowed("3D000")) => {
                log::info!("Database missing, attempting to create it");
                create_database_if_missing(database_url).await?;

                PgPoolOptions::new()
                    .max_connections(10)
                    .min_connections(2)
                    .acquire_timeout(Duration::from_secs(5))
                    .idle_timeout(Some(Duration::from_secs(600)))
                    .test_before_acquire(true)
                    .connect(database_url)
                    .await?
            }
            Err(err) => return Err(err),
        };

        // Run embedded migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    // ========================================================================
    // BUSINESS LISTINGS (document-style rows, reviews embedded as JSONB)
    // ========================================================================

    pub async fn create_business(&self, business: Business) -> Result<Business, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO businesses (
                id, name, description, category, location, contact_info,
                images, rating, reviews, owner_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING
                id, name, description, category, location, contact_info,
                images, rating, reviews, owner_id, created_at, updated_at
            "#,
        )
        .bind(business.id)
        .bind(&business.name)
        .bind(&business.description)
        .bind(&business.category)
        .bind(Json(&business.location))
        .bind(Json(&business.contact_info))
        .bind(&business.images)
        .bind(business.rating)
        .bind(Json(&business.reviews))
        .bind(business.owner_id)
        .bind(business.created_at)
        .bind(business.updated_at)
        .fetch_one(&self.pool)
        .await?;

        row_to_business(&row)
    }

    pub async fn get_business(&self, business_id: Uuid) -> Result<Option<Business>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, category, location, contact_info,
                   images, rating, reviews, owner_id, created_at, updated_at
            FROM businesses
            WHERE id = $1
            "#,
        )
        .bind(business_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_business(&r)).transpose()
    }

    pub async fn list_businesses_for_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Vec<Business>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, category, location, contact_info,
                   images, rating, reviews, owner_id, created_at, updated_at
            FROM businesses
            WHERE owner_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_business).collect()
    }

    pub async fn count_businesses_for_owner(&self, owner_id: Uuid) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM businesses WHERE owner_id = $1")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;
        row.try_get("total")
    }

    /// One page of listings ordered newest first, continuing after the
    /// cursor's `created_at` when given. Equality filters are applied by
    /// the caller over the returned page.
    pub async fn list_businesses_page(
        &self,
        page_size: i64,
        start_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Business>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, category, location, contact_info,
                   images, rating, reviews, owner_id, created_at, updated_at
            FROM businesses
            WHERE ($2::timestamptz IS NULL OR created_at < $2)
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(page_size)
        .bind(start_after)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_business).collect()
    }

    /// Full collection scan for term searches; the store has no full-text
    /// index.
    pub async fn list_all_businesses(&self) -> Result<Vec<Business>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, category, location, contact_info,
                   images, rating, reviews, owner_id, created_at, updated_at
            FROM businesses
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_business).collect()
    }

    pub async fn update_business(&self, business: Business) -> Result<Business, sqlx::Error> {
        let row = sqlx::query(
            r#"
            UPDATE businesses
            SET name = $2, description = $3, category = $4, location = $5,
                contact_info = $6, images = $7, updated_at = $8
            WHERE id = $1
            RETURNING
                id, name, description, category, location, contact_info,
                images, rating, reviews, owner_id, created_at, updated_at
            "#,
        )
        .bind(business.id)
        .bind(&business.name)
        .bind(&business.description)
        .bind(&business.category)
        .bind(Json(&business.location))
        .bind(Json(&business.contact_info))
        .bind(&business.images)
        .bind(business.updated_at)
        .fetch_one(&self.pool)
        .await?;

        row_to_business(&row)
    }

    pub async fn delete_business(&self, business_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM businesses WHERE id = $1")
            .bind(business_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Read-modify-write of a listing's review list under optimistic
    /// concurrency; see [`apply_review_mutation`].
    pub async fn mutate_business_reviews<F>(
        &self,
        business_id: Uuid,
        apply: F,
    ) -> Result<Business, ServiceError>
    where
        F: FnMut(&mut Business) -> Result<(), ServiceError>,
    {
        apply_review_mutation(self, business_id, apply).await
    }

    // ========================================================================
    // USER PROFILES
    // ========================================================================

    pub async fn get_user_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserProfile>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, email, name, subscription, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_user_profile(&r)).transpose()
    }

    /// Fetch the profile, creating the default free-tier record on first
    /// access. A concurrent first access resolves to whichever row landed
    /// first.
    pub async fn get_or_create_user_profile(
        &self,
        user_id: Uuid,
        email: &str,
        name: &str,
    ) -> Result<UserProfile, sqlx::Error> {
        if let Some(profile) = self.get_user_profile(user_id).await? {
            return Ok(profile);
        }

        let now = Utc::now();
        let subscription = crate::models::default_free_subscription(now);
        let row = sqlx::query(
            r#"
            INSERT INTO users (id, email, name, subscription, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET updated_at = users.updated_at
            RETURNING id, email, name, subscription, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(email)
        .bind(name)
        .bind(Json(&subscription))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row_to_user_profile(&row)
    }
}

/// Fetch/conditional-store seam for the review write cycle. `Database`
/// backs it with a conditional `UPDATE`; tests back it with an in-memory
/// document.
#[async_trait]
pub trait BusinessDocStore: Send + Sync {
    async fn load_business(&self, business_id: Uuid) -> Result<Option<Business>, ServiceError>;

    /// Persist `(reviews, rating, updated_at)` only if the stored row still
    /// carries `expected_updated_at`. Returns whether the write landed.
    async fn store_reviews_if_unchanged(
        &self,
        business: &Business,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;
}

#[async_trait]
impl BusinessDocStore for Database {
    async fn load_business(&self, business_id: Uuid) -> Result<Option<Business>, ServiceError> {
        Ok(self.get_business(business_id).await?)
    }

    async fn store_reviews_if_unchanged(
        &self,
        business: &Business,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE businesses
            SET reviews = $2, rating = $3, updated_at = $4
            WHERE id = $1 AND updated_at = $5
            "#,
        )
        .bind(business.id)
        .bind(Json(&business.reviews))
        .bind(business.rating)
        .bind(business.updated_at)
        .bind(expected_updated_at)
        .execute(&self.pool)
        .await
        .map_err(ServiceError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

/// Read-modify-write of a listing's review list under optimistic
/// concurrency: the write only lands if `updated_at` is unchanged since the
/// read, otherwise the cycle is retried with fresh state. Keeps
/// `(reviews, rating)` visible as a single document update.
pub async fn apply_review_mutation<S, F>(
    store: &S,
    business_id: Uuid,
    mut apply: F,
) -> Result<Business, ServiceError>
where
    S: BusinessDocStore + ?Sized,
    F: FnMut(&mut Business) -> Result<(), ServiceError>,
{
    for attempt in 0..MUTATE_RETRIES {
        let mut business = store
            .load_business(business_id)
            .await?
            .ok_or(ServiceError::BusinessNotFound)?;
        let expected_updated_at = business.updated_at;

        apply(&mut business)?;

        if store
            .store_reviews_if_unchanged(&business, expected_updated_at)
            .await?
        {
            return Ok(business);
        }
        log::warn!(
            "Conflicting review write on business {business_id}, retry {}",
            attempt + 1
        );
    }

    Err(ServiceError::WriteConflict)
}

// Row mapping functions

fn row_to_business(row: &PgRow) -> Result<Business, sqlx::Error> {
    Ok(Business {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        location: row.try_get::<Json<BusinessLocation>, _>("location")?.0,
        contact_info: row.try_get::<Json<ContactInfo>, _>("contact_info")?.0,
        images: row.try_get("images")?,
        rating: row.try_get("rating")?,
        reviews: row.try_get::<Json<Vec<Review>>, _>("reviews")?.0,
        owner_id: row.try_get("owner_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_user_profile(row: &PgRow) -> Result<UserProfile, sqlx::Error> {
    Ok(UserProfile {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        subscription: row.try_get::<Json<SubscriptionStatus>, _>("subscription")?.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn create_database_if_missing(database_url: &str) -> Result<(), sqlx::Error> {
    let options: PgConnectOptions = database_url.parse()?;
    let database_name = options
        .get_database()
        .map(|name| name.to_string())
        .unwrap_or_else(|| "postgres".to_string());

    // If we're already targeting the default maintenance database, nothing to do.
    if database_name.eq_ignore_ascii_case("postgres") {
        return Ok(());
    }

    let maintenance_options = options.clone().database("postgres");
    let mut connection = sqlx::postgres::PgConnection::connect_with(&maintenance_options).await?;

    let escaped_name = database_name.replace('"', "\"\"");
    let create_stmt = format!("CREATE DATABASE \"{}\"", escaped_name);
    match sqlx::query(&create_stmt).execute(&mut connection).await {
        Ok(_) => log::info!("Database '{database_name}' created"),
        Err(err) => log::warn!("Could not create database '{database_name}': {err}"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BusinessLocation, ContactInfo};
    use crate::reviews;
    use chrono::Duration;
    use std::sync::Mutex;

    fn listing(owner_id: Uuid) -> Business {
        let now = Utc::now();
        Business {
            id: Uuid::new_v4(),
            name: "Panadería El Trigal".into(),
            description: "Pan artesanal todos los días".into(),
            category: "panaderias".into(),
            location: BusinessLocation {
                is_national: false,
                province: Some("Pichincha".into()),
                city: Some("Quito".into()),
            },
            contact_info: ContactInfo {
                whatsapp: "0991234567".into(),
                email: None,
                instagram: None,
            },
            images: Vec::new(),
            rating: 0.0,
            reviews: Vec::new(),
            owner_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// In-memory document store. Each pending conflict makes one write
    /// attempt observe a competing writer landing first.
    struct MemoryDocStore {
        business: Mutex<Business>,
        conflicts_remaining: Mutex<u32>,
    }

    impl MemoryDocStore {
        fn new(business: Business, conflicts: u32) -> Self {
            Self {
                business: Mutex::new(business),
                conflicts_remaining: Mutex::new(conflicts),
            }
        }
    }

    #[async_trait]
    impl BusinessDocStore for MemoryDocStore {
        async fn load_business(
            &self,
            business_id: Uuid,
        ) -> Result<Option<Business>, ServiceError> {
            let current = self.business.lock().unwrap();
            if current.id == business_id {
                Ok(Some(current.clone()))
            } else {
                Ok(None)
            }
        }

        async fn store_reviews_if_unchanged(
            &self,
            business: &Business,
            expected_updated_at: DateTime<Utc>,
        ) -> Result<bool, ServiceError> {
            let mut current = self.business.lock().unwrap();
            let mut conflicts = self.conflicts_remaining.lock().unwrap();
            if *conflicts > 0 {
                *conflicts -= 1;
                current.updated_at = current.updated_at + Duration::milliseconds(1);
            }
            if current.updated_at != expected_updated_at {
                return Ok(false);
            }
            *current = business.clone();
            Ok(true)
        }
    }

    fn tags() -> Vec<String> {
        vec!["servicio".to_string()]
    }

    #[tokio::test]
    async fn review_mutation_lands_without_contention() {
        let business = listing(Uuid::new_v4());
        let business_id = business.id;
        let store = MemoryDocStore::new(business, 0);

        let updated = apply_review_mutation(&store, business_id, |b| {
            reviews::submit_review(b, Uuid::new_v4(), 5, &tags(), Utc::now()).map(|_| ())
        })
        .await
        .unwrap();

        assert_eq!(updated.reviews.len(), 1);
        assert_eq!(updated.rating, 5.0);
        assert_eq!(store.business.lock().unwrap().reviews.len(), 1);
    }

    #[tokio::test]
    async fn conflicting_write_retries_with_fresh_state() {
        let business = listing(Uuid::new_v4());
        let business_id = business.id;
        let store = MemoryDocStore::new(business, 1);
        let reviewer = Uuid::new_v4();

        let updated = apply_review_mutation(&store, business_id, |b| {
            reviews::submit_review(b, reviewer, 4, &tags(), Utc::now()).map(|_| ())
        })
        .await
        .unwrap();

        // The first attempt lost the race; the retry re-read and landed
        // exactly one review.
        assert_eq!(updated.reviews.len(), 1);
        assert_eq!(updated.reviews[0].user_id, reviewer);
        assert_eq!(store.business.lock().unwrap().reviews.len(), 1);
    }

    #[tokio::test]
    async fn persistent_conflicts_exhaust_retries() {
        let business = listing(Uuid::new_v4());
        let business_id = business.id;
        let store = MemoryDocStore::new(business, MUTATE_RETRIES);

        let err = apply_review_mutation(&store, business_id, |b| {
            reviews::submit_review(b, Uuid::new_v4(), 3, &tags(), Utc::now()).map(|_| ())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ServiceError::WriteConflict));
        assert!(store.business.lock().unwrap().reviews.is_empty());
    }

    #[tokio::test]
    async fn missing_business_is_not_found() {
        let store = MemoryDocStore::new(listing(Uuid::new_v4()), 0);

        let err = apply_review_mutation(&store, Uuid::new_v4(), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BusinessNotFound));
    }

    #[tokio::test]
    async fn precondition_failure_writes_nothing() {
        let owner = Uuid::new_v4();
        let business = listing(owner);
        let business_id = business.id;
        let store = MemoryDocStore::new(business, 0);

        let err = apply_review_mutation(&store, business_id, |b| {
            reviews::submit_review(b, owner, 5, &tags(), Utc::now()).map(|_| ())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ServiceError::SelfReview));
        assert!(store.business.lock().unwrap().reviews.is_empty());
    }
}
