use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// ENUMS
// ============================================================================

/// Subscription tier for a registered user
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    Free,
    Premium,
    Business,
}

// ============================================================================
// BUSINESS LISTINGS
// ============================================================================

/// Where a business operates. National listings carry no province/city.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusinessLocation {
    pub is_national: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// Contact channels for a listing. WhatsApp is the only required channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactInfo {
    pub whatsapp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram: Option<String>,
}

/// Owner reply attached to a review
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OwnerResponse {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Abuse flags accumulated on a review
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewFlags {
    pub count: i32,
    pub reasons: Vec<String>,
}

/// Tag-based rating left by a user on a listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Review {
    pub id: Uuid,
    pub user_id: Uuid,
    pub rating: i32,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_response: Option<OwnerResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<ReviewFlags>,
}

/// Directory listing. Reviews are embedded in the listing document and the
/// aggregate `rating` is recomputed whenever the review list changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub category: String,
    pub location: BusinessLocation,
    pub contact_info: ContactInfo,
    pub images: Vec<String>,
    pub rating: f64,
    pub reviews: Vec<Review>,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Business {
    /// Detach an image URL from the listing. Returns whether it was present.
    pub fn remove_image(&mut self, url: &str) -> bool {
        let before = self.images.len();
        self.images.retain(|image| image != url);
        self.images.len() != before
    }
}

// ============================================================================
// USER PROFILES & SUBSCRIPTIONS
// ============================================================================

/// Current subscription record for a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    #[serde(rename = "type")]
    pub tier: SubscriptionType,
    pub is_active: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub features: Vec<String>,
}

/// User profile with its subscription. Created lazily on first access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub subscription: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// REQUEST/RESPONSE DTOs
// ============================================================================

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}

/// Payload sent by owners to create a listing
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBusinessRequest {
    #[validate(length(min = 3, max = 120))]
    pub name: String,
    #[validate(length(min = 10, max = 2000))]
    pub description: String,
    #[validate(length(min = 3, max = 60))]
    pub category: String,
    pub location: BusinessLocation,
    pub contact_info: ContactInfo,
}

impl CreateBusinessRequest {
    pub fn validate_business_rules(&self) -> Result<(), String> {
        validate_location(&self.location)?;
        validate_contact_info(&self.contact_info)?;
        Ok(())
    }

    pub fn into_new_business(self, owner_id: Uuid) -> Business {
        let now = Utc::now();
        Business {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            category: self.category,
            location: normalize_location(self.location),
            contact_info: self.contact_info,
            images: Vec::new(),
            rating: 0.0,
            reviews: Vec::new(),
            owner_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Payload sent by owners to update a listing
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateBusinessRequest {
    #[validate(length(min = 3, max = 120))]
    pub name: String,
    #[validate(length(min = 10, max = 2000))]
    pub description: String,
    #[validate(length(min = 3, max = 60))]
    pub category: String,
    pub location: BusinessLocation,
    pub contact_info: ContactInfo,
}

impl UpdateBusinessRequest {
    pub fn validate_business_rules(&self) -> Result<(), String> {
        validate_location(&self.location)?;
        validate_contact_info(&self.contact_info)?;
        Ok(())
    }

    pub fn apply_to_existing(&self, existing: &mut Business) {
        existing.name = self.name.clone();
        existing.description = self.description.clone();
        existing.category = self.category.clone();
        existing.location = normalize_location(self.location.clone());
        existing.contact_info = self.contact_info.clone();
        existing.updated_at = Utc::now();
    }
}

/// Review submission payload. The reviewer comes from the actor header.
#[derive(Debug, Deserialize)]
pub struct SubmitReviewRequest {
    pub rating: i32,
    pub tags: Vec<String>,
}

/// Owner reply payload for a review
#[derive(Debug, Deserialize, Validate)]
pub struct RespondReviewRequest {
    #[validate(length(min = 1, max = 1000))]
    pub text: String,
}

/// Abuse report payload for a review
#[derive(Debug, Deserialize, Validate)]
pub struct FlagReviewRequest {
    #[validate(length(min = 3, max = 500))]
    pub reason: String,
}

/// Payload to detach an image from a listing
#[derive(Debug, Deserialize)]
pub struct DeleteImageRequest {
    pub url: String,
}

/// One page of search results. `next_cursor` is the `created_at` of the
/// last item and is best-effort only for term searches.
#[derive(Debug, Serialize)]
pub struct SearchPage {
    pub items: Vec<Business>,
    pub next_cursor: Option<DateTime<Utc>>,
}

// ============================================================================
// BUSINESS-RULE VALIDATION
// ============================================================================

fn validate_location(location: &BusinessLocation) -> Result<(), String> {
    if location.is_national {
        return Ok(());
    }
    if location
        .province
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .is_empty()
    {
        return Err("La provincia es requerida".into());
    }
    if location
        .city
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .is_empty()
    {
        return Err("La ciudad es requerida".into());
    }
    Ok(())
}

fn validate_contact_info(contact: &ContactInfo) -> Result<(), String> {
    if contact.whatsapp.trim().is_empty() {
        return Err("El número de WhatsApp es requerido".into());
    }
    if !is_valid_whatsapp(&contact.whatsapp) {
        return Err(
            "El número de WhatsApp no es válido. Debe ser un número de Ecuador (+593 o empezar con 0)"
                .into(),
        );
    }
    if let Some(email) = contact.email.as_deref() {
        if !email.is_empty() && !is_valid_email(email) {
            return Err("El email no es válido".into());
        }
    }
    if let Some(instagram) = contact.instagram.as_deref() {
        if !instagram.is_empty() && !is_valid_instagram(instagram) {
            return Err("El usuario de Instagram no es válido".into());
        }
    }
    Ok(())
}

/// Ecuador phone format: +593 or leading 0, then a landline area code (2-7)
/// plus 7 digits, or a mobile prefix (9[2-9]) plus 7 digits.
pub fn is_valid_whatsapp(number: &str) -> bool {
    let compact: String = number.chars().filter(|c| !c.is_whitespace()).collect();
    let rest = if let Some(r) = compact.strip_prefix("+593") {
        r
    } else if let Some(r) = compact.strip_prefix('0') {
        r
    } else {
        return false;
    };

    if !rest.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match rest.as_bytes() {
        [b'2'..=b'7', ..] => rest.len() == 8,
        [b'9', b'2'..=b'9', ..] => rest.len() == 9,
        _ => false,
    }
}

pub fn is_valid_email(email: &str) -> bool {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        _ => false,
    }
}

pub fn is_valid_instagram(handle: &str) -> bool {
    let handle = handle.strip_prefix('@').unwrap_or(handle);
    let len = handle.chars().count();
    if !(3..=30).contains(&len) {
        return false;
    }
    if handle.starts_with('.') || handle.ends_with('.') || handle.contains("..") {
        return false;
    }
    handle
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn normalize_location(location: BusinessLocation) -> BusinessLocation {
    if location.is_national {
        BusinessLocation {
            is_national: true,
            province: None,
            city: None,
        }
    } else {
        location
    }
}

/// Default subscription granted when a profile is first seen: free tier,
/// active, valid for one year.
pub fn default_free_subscription(now: DateTime<Utc>) -> SubscriptionStatus {
    SubscriptionStatus {
        tier: SubscriptionType::Free,
        is_active: true,
        start_date: now,
        end_date: now + Duration::days(365),
        features: crate::subscription::features_for(SubscriptionType::Free),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(whatsapp: &str) -> ContactInfo {
        ContactInfo {
            whatsapp: whatsapp.to_string(),
            email: None,
            instagram: None,
        }
    }

    #[test]
    fn whatsapp_accepts_ecuador_numbers() {
        assert!(is_valid_whatsapp("+593 99 123 4567"));
        assert!(is_valid_whatsapp("0991234567"));
        assert!(is_valid_whatsapp("022345678"));
        assert!(!is_valid_whatsapp("+1 555 123 4567"));
        assert!(!is_valid_whatsapp("0911234567")); // 91 is not a mobile prefix
        assert!(!is_valid_whatsapp("099123456")); // too short
        assert!(!is_valid_whatsapp(""));
    }

    #[test]
    fn instagram_handles() {
        assert!(is_valid_instagram("@mi.negocio_ec"));
        assert!(is_valid_instagram("panaderia99"));
        assert!(!is_valid_instagram("ab"));
        assert!(!is_valid_instagram("doble..punto"));
        assert!(!is_valid_instagram(".empieza"));
    }

    #[test]
    fn contact_requires_whatsapp() {
        let err = validate_contact_info(&contact("  ")).unwrap_err();
        assert_eq!(err, "El número de WhatsApp es requerido");

        let mut ok = contact("0991234567");
        ok.email = Some("dueno@negocio.ec".into());
        ok.instagram = Some("@negocio".into());
        assert!(validate_contact_info(&ok).is_ok());
    }

    #[test]
    fn local_listing_requires_province_and_city() {
        let missing = BusinessLocation {
            is_national: false,
            province: Some("Pichincha".into()),
            city: None,
        };
        assert_eq!(
            validate_location(&missing).unwrap_err(),
            "La ciudad es requerida"
        );

        let national = BusinessLocation {
            is_national: true,
            province: None,
            city: None,
        };
        assert!(validate_location(&national).is_ok());
    }

    #[test]
    fn remove_image_detaches_only_the_named_url() {
        let mut business = CreateBusinessRequest {
            name: "Panadería El Trigal".into(),
            description: "Pan artesanal todos los días".into(),
            category: "panaderias".into(),
            location: BusinessLocation {
                is_national: true,
                province: None,
                city: None,
            },
            contact_info: contact("0991234567"),
        }
        .into_new_business(Uuid::new_v4());
        business.images = vec!["https://cdn/a.jpg".into(), "https://cdn/b.jpg".into()];

        assert!(business.remove_image("https://cdn/a.jpg"));
        assert_eq!(business.images, vec!["https://cdn/b.jpg".to_string()]);
        assert!(!business.remove_image("https://cdn/missing.jpg"));
        assert_eq!(business.images.len(), 1);
    }

    #[test]
    fn national_listing_drops_province_and_city() {
        let normalized = normalize_location(BusinessLocation {
            is_national: true,
            province: Some("Guayas".into()),
            city: Some("Guayaquil".into()),
        });
        assert_eq!(normalized.province, None);
        assert_eq!(normalized.city, None);
    }
}
