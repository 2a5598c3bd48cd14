use crate::models::{SubscriptionStatus, SubscriptionType};

/// Feature lists shown to users per tier.
pub fn features_for(tier: SubscriptionType) -> Vec<String> {
    let features: &[&str] = match tier {
        SubscriptionType::Free => &[
            "Un negocio gratuito",
            "Listado básico",
            "Fotos básicas (2 fotos)",
            "Contacto por WhatsApp",
            "Reseñas básicas",
        ],
        SubscriptionType::Premium => &[
            "Hasta 3 negocios",
            "Listado destacado",
            "Más fotos (hasta 10)",
            "WhatsApp y redes sociales",
            "Reseñas con fotos",
            "Estadísticas básicas",
            "Ofertas especiales",
            "Pagos móviles",
            "Soporte prioritario",
        ],
        SubscriptionType::Business => &[
            "Negocios ilimitados",
            "Listado premium con prioridad",
            "Fotos y videos ilimitados",
            "Todos los métodos de contacto",
            "Sistema completo de reseñas",
            "Estadísticas avanzadas",
            "Panel de administración",
            "Publicidad incluida",
            "Marketing por WhatsApp",
            "Pagos móviles y QR",
            "Soporte 24/7",
            "Capacitación empresarial",
        ],
    };
    features.iter().map(|f| f.to_string()).collect()
}

/// How many listings the tier allows. `None` means unlimited.
pub fn max_businesses(subscription: &SubscriptionStatus) -> Option<u32> {
    if !subscription.is_active {
        return Some(0);
    }
    match subscription.tier {
        SubscriptionType::Free => Some(1),
        SubscriptionType::Premium => Some(3),
        SubscriptionType::Business => None,
    }
}

/// How many images a single listing may carry. `None` means unlimited.
pub fn max_images(subscription: &SubscriptionStatus) -> Option<u32> {
    if !subscription.is_active {
        return Some(0);
    }
    match subscription.tier {
        SubscriptionType::Free => Some(2),
        SubscriptionType::Premium => Some(10),
        SubscriptionType::Business => None,
    }
}
