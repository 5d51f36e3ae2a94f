//! Rate Limiter fuer weitergeleitete Signale
//!
//! Token-Bucket pro Identitaet. Ein Bucket fasst `signale_pro_minute` Token
//! (Burst) und fuellt sich gleichmaessig ueber eine Minute wieder auf.

use fernruf_core::types::UserId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Inaktive Buckets werden nach dieser Zeit verworfen
const BUCKET_LEBENSDAUER: Duration = Duration::from_secs(300);

/// Ein Token-Bucket fuer eine einzelne Identitaet
#[derive(Debug)]
struct TokenBucket {
    /// Aktuelle Token-Anzahl (als f64 fuer Bruchteil-Auffuellung)
    token: f64,
    max_token: f64,
    /// Auffuellrate in Token pro Sekunde
    fuellrate: f64,
    letzte_auffuellung: Instant,
}

impl TokenBucket {
    fn neu(pro_minute: u32, jetzt: Instant) -> Self {
        let max = pro_minute as f64;
        Self {
            token: max,
            max_token: max,
            fuellrate: max / 60.0,
            letzte_auffuellung: jetzt,
        }
    }

    fn verbrauchen(&mut self, jetzt: Instant) -> bool {
        self.auffuellen(jetzt);
        if self.token >= 1.0 {
            self.token -= 1.0;
            true
        } else {
            false
        }
    }

    fn auffuellen(&mut self, jetzt: Instant) {
        let vergangen = jetzt
            .saturating_duration_since(self.letzte_auffuellung)
            .as_secs_f64();
        self.token = (self.token + vergangen * self.fuellrate).min(self.max_token);
        self.letzte_auffuellung = jetzt;
    }
}

/// Rate Limiter fuer Signale pro Identitaet
///
/// `signale_pro_minute == 0` schaltet die Begrenzung ab.
pub struct SignalRateLimiter {
    signale_pro_minute: u32,
    buckets: Mutex<HashMap<UserId, TokenBucket>>,
}

impl SignalRateLimiter {
    pub fn neu(signale_pro_minute: u32) -> Self {
        Self {
            signale_pro_minute,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Prueft und verbraucht ein Token. Gibt `true` zurueck wenn erlaubt.
    pub fn pruefen(&self, user_id: &UserId) -> bool {
        self.pruefen_zu(user_id, Instant::now())
    }

    fn pruefen_zu(&self, user_id: &UserId, jetzt: Instant) -> bool {
        if self.signale_pro_minute == 0 {
            return true;
        }
        let mut buckets = self.buckets.lock();
        buckets
            .entry(*user_id)
            .or_insert_with(|| TokenBucket::neu(self.signale_pro_minute, jetzt))
            .verbrauchen(jetzt)
    }

    /// Entfernt Buckets die laenger als fuenf Minuten unbenutzt sind
    pub fn aufraeumen(&self) {
        let jetzt = Instant::now();
        self.buckets.lock().retain(|_, bucket| {
            jetzt.saturating_duration_since(bucket.letzte_auffuellung) < BUCKET_LEBENSDAUER
        });
    }

    /// Anzahl aktiver Buckets
    pub fn anzahl(&self) -> usize {
        self.buckets.lock().len()
    }
}
