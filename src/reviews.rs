//! Review aggregation over the embedded review list of a listing.
//!
//! All functions here are pure mutations of an in-memory `Business`; the
//! caller persists `(reviews, rating, updated_at)` as one document update.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::{Business, OwnerResponse, Review, ReviewFlags};

/// Mean of all review ratings rounded to one decimal, 0.0 with no reviews.
pub fn aggregate_rating(reviews: &[Review]) -> f64 {
    if reviews.is_empty() {
        return 0.0;
    }
    let total: i64 = reviews.iter().map(|r| i64::from(r.rating)).sum();
    let mean = total as f64 / reviews.len() as f64;
    (mean * 10.0).round() / 10.0
}

/// Trim tags and drop the empties. Order is preserved.
pub fn clean_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Append a review from `reviewer_id`. Preconditions are checked in order
/// and the first failure wins with the listing untouched.
pub fn submit_review(
    business: &mut Business,
    reviewer_id: Uuid,
    rating: i32,
    tags: &[String],
    now: DateTime<Utc>,
) -> Result<Review, ServiceError> {
    if reviewer_id == business.owner_id {
        return Err(ServiceError::SelfReview);
    }
    if business.reviews.iter().any(|r| r.user_id == reviewer_id) {
        return Err(ServiceError::DuplicateReview);
    }
    if !(1..=5).contains(&rating) {
        return Err(ServiceError::RatingOutOfRange);
    }
    let tags = clean_tags(tags);
    if tags.is_empty() {
        return Err(ServiceError::NoValidTags);
    }

    let review = Review {
        id: Uuid::new_v4(),
        user_id: reviewer_id,
        rating,
        tags,
        created_at: now,
        owner_response: None,
        flags: None,
    };
    business.reviews.push(review.clone());
    business.rating = aggregate_rating(&business.reviews);
    business.updated_at = now;
    Ok(review)
}

/// Attach the owner's reply to a review. A second reply replaces the first.
pub fn respond_to_review(
    business: &mut Business,
    review_id: Uuid,
    text: String,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let review = find_review_mut(business, review_id)?;
    review.owner_response = Some(OwnerResponse {
        text,
        created_at: now,
    });
    business.updated_at = now;
    Ok(())
}

/// Record one abuse report against a review.
pub fn flag_review(
    business: &mut Business,
    review_id: Uuid,
    reason: String,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let review = find_review_mut(business, review_id)?;
    let flags = review.flags.get_or_insert_with(ReviewFlags::default);
    flags.count += 1;
    flags.reasons.push(reason);
    business.updated_at = now;
    Ok(())
}

/// Remove a review and recompute the aggregate over the remainder.
pub fn delete_review(
    business: &mut Business,
    review_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let before = business.reviews.len();
    business.reviews.retain(|r| r.id != review_id);
    if business.reviews.len() == before {
        return Err(ServiceError::ReviewNotFound);
    }
    business.rating = aggregate_rating(&business.reviews);
    business.updated_at = now;
    Ok(())
}

fn find_review_mut(
    business: &mut Business,
    review_id: Uuid,
) -> Result<&mut Review, ServiceError> {
    business
        .reviews
        .iter_mut()
        .find(|r| r.id == review_id)
        .ok_or(ServiceError::ReviewNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BusinessLocation, ContactInfo};

    fn listing(owner_id: Uuid) -> Business {
        let now = Utc::now();
        Business {
            id: Uuid::new_v4(),
            name: "Pizzería La Esquina".into(),
            description: "Pizza artesanal al horno de leña".into(),
            category: "restaurantes".into(),
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

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn rating_is_mean_rounded_to_one_decimal() {
        let owner = Uuid::new_v4();
        let mut business = listing(owner);
        let now = Utc::now();

        submit_review(&mut business, Uuid::new_v4(), 5, &tags(&["servicio"]), now).unwrap();
        submit_review(&mut business, Uuid::new_v4(), 3, &tags(&["precio"]), now).unwrap();
        assert_eq!(business.rating, 4.0);

        submit_review(&mut business, Uuid::new_v4(), 4, &tags(&["sabor"]), now).unwrap();
        assert_eq!(business.rating, 4.0);
    }

    #[test]
    fn deleting_a_review_recomputes_the_aggregate() {
        let owner = Uuid::new_v4();
        let mut business = listing(owner);
        let now = Utc::now();

        submit_review(&mut business, Uuid::new_v4(), 5, &tags(&["servicio"]), now).unwrap();
        let three = submit_review(&mut business, Uuid::new_v4(), 3, &tags(&["precio"]), now).unwrap();
        submit_review(&mut business, Uuid::new_v4(), 4, &tags(&["sabor"]), now).unwrap();

        delete_review(&mut business, three.id, now).unwrap();
        assert_eq!(business.reviews.len(), 2);
        assert_eq!(business.rating, 4.5);

        let remaining: Vec<Uuid> = business.reviews.iter().map(|r| r.id).collect();
        delete_review(&mut business, remaining[0], now).unwrap();
        delete_review(&mut business, remaining[1], now).unwrap();
        assert_eq!(business.rating, 0.0);
    }

    #[test]
    fn owner_cannot_review_own_listing() {
        let owner = Uuid::new_v4();
        let mut business = listing(owner);
        let err = submit_review(&mut business, owner, 5, &tags(&["servicio"]), Utc::now());
        assert!(matches!(err, Err(ServiceError::SelfReview)));
        assert!(business.reviews.is_empty());
        assert_eq!(business.rating, 0.0);
    }

    #[test]
    fn one_review_per_user() {
        let mut business = listing(Uuid::new_v4());
        let reviewer = Uuid::new_v4();
        let now = Utc::now();

        submit_review(&mut business, reviewer, 4, &tags(&["servicio"]), now).unwrap();
        let err = submit_review(&mut business, reviewer, 5, &tags(&["sabor"]), now);
        assert!(matches!(err, Err(ServiceError::DuplicateReview)));
        assert_eq!(business.reviews.len(), 1);
    }

    #[test]
    fn tags_are_trimmed_and_blanks_rejected() {
        let mut business = listing(Uuid::new_v4());
        let now = Utc::now();

        let review = submit_review(
            &mut business,
            Uuid::new_v4(),
            4,
            &tags(&["  servicio ", "", "   ", "precio"]),
            now,
        )
        .unwrap();
        assert_eq!(review.tags, vec!["servicio", "precio"]);

        let err = submit_review(&mut business, Uuid::new_v4(), 4, &tags(&["", "  "]), now);
        assert!(matches!(err, Err(ServiceError::NoValidTags)));
    }

    #[test]
    fn rating_must_be_between_one_and_five() {
        let mut business = listing(Uuid::new_v4());
        let now = Utc::now();
        for bad in [0, 6, -1] {
            let err = submit_review(&mut business, Uuid::new_v4(), bad, &tags(&["servicio"]), now);
            assert!(matches!(err, Err(ServiceError::RatingOutOfRange)));
        }
    }

    #[test]
    fn flagging_accumulates_reasons() {
        let mut business = listing(Uuid::new_v4());
        let now = Utc::now();
        let review = submit_review(&mut business, Uuid::new_v4(), 2, &tags(&["precio"]), now).unwrap();

        flag_review(&mut business, review.id, "contenido ofensivo".into(), now).unwrap();
        flag_review(&mut business, review.id, "spam".into(), now).unwrap();

        let flags = business.reviews[0].flags.as_ref().unwrap();
        assert_eq!(flags.count, 2);
        assert_eq!(flags.reasons, vec!["contenido ofensivo", "spam"]);

        let err = flag_review(&mut business, Uuid::new_v4(), "spam".into(), now);
        assert!(matches!(err, Err(ServiceError::ReviewNotFound)));
    }

    #[test]
    fn owner_response_attaches_to_the_review() {
        let mut business = listing(Uuid::new_v4());
        let now = Utc::now();
        let review = submit_review(&mut business, Uuid::new_v4(), 5, &tags(&["servicio"]), now).unwrap();

        respond_to_review(&mut business, review.id, "¡Gracias por su visita!".into(), now).unwrap();
        let response = business.reviews[0].owner_response.as_ref().unwrap();
        assert_eq!(response.text, "¡Gracias por su visita!");
    }
}
