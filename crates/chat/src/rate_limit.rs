//! Rate Limiter fuer Chat-Nachrichten
//!
//! Token-Bucket pro Benutzer: `nachrichten_pro_minute` als Burst, gleichmaessig
//! ueber die Minute wieder aufgefuellt.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use raumfunk_core::types::UserId;

/// Ein Token-Bucket fuer einen einzelnen Benutzer
#[derive(Debug)]
pub(crate) struct TokenBucket {
    /// Aktuelle Token-Anzahl (als f64 fuer Bruchteil-Auffuellung)
    token: f64,
    /// Maximale Token-Anzahl (= Burst-Limit)
    max_token: f64,
    /// Auffuellrate in Token pro Sekunde
    fuellrate: f64,
    letzte_auffuellung: Instant,
}

impl TokenBucket {
    pub(crate) fn neu(pro_minute: u32, jetzt: Instant) -> Self {
        let max = pro_minute as f64;
        Self {
            token: max,
            max_token: max,
            fuellrate: max / 60.0,
            letzte_auffuellung: jetzt,
        }
    }

    /// Versucht ein Token zu verbrauchen. Gibt `true` zurueck wenn erlaubt.
    pub(crate) fn verbrauchen(&mut self, jetzt: Instant) -> bool {
        self.auffuellen(jetzt);
        if self.token >= 1.0 {
            self.token -= 1.0;
            true
        } else {
            false
        }
    }

    /// Sekunden bis zum naechsten verfuegbaren Token
    pub(crate) fn retry_after_secs(&self) -> u64 {
        let fehlend = 1.0 - self.token;
        if fehlend <= 0.0 || self.fuellrate <= 0.0 {
            return 0;
        }
        (fehlend / self.fuellrate).ceil() as u64
    }

    fn auffuellen(&mut self, jetzt: Instant) {
        let vergangen = jetzt
            .saturating_duration_since(self.letzte_auffuellung)
            .as_secs_f64();
        self.token = (self.token + vergangen * self.fuellrate).min(self.max_token);
        self.letzte_auffuellung = jetzt;
    }
}

/// Token-Buckets aller Benutzer
///
/// Der Schluessel ist die `UserId`, nicht die pro Verbindung neue `PeerId`:
/// ein Wiederverbinden setzt das Limit nicht zurueck.
pub struct RateLimiter {
    pro_minute: u32,
    buckets: Mutex<HashMap<UserId, TokenBucket>>,
}

impl RateLimiter {
    pub fn neu(pro_minute: u32) -> Self {
        Self {
            pro_minute,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Prueft und verbraucht ein Token fuer einen Benutzer.
    ///
    /// Gibt `Ok(())` zurueck wenn erlaubt, `Err(retry_after_secs)` sonst.
    pub fn pruefen(&self, user: &UserId) -> Result<(), u64> {
        self.pruefen_zu(user, Instant::now())
    }

    pub(crate) fn pruefen_zu(&self, user: &UserId, jetzt: Instant) -> Result<(), u64> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(user.clone())
            .or_insert_with(|| TokenBucket::neu(self.pro_minute, jetzt));
        if bucket.verbrauchen(jetzt) {
            Ok(())
        } else {
            Err(bucket.retry_after_secs())
        }
    }

    /// Bereinigt Buckets die seit mehr als 5 Minuten inaktiv sind
    ///
    /// Ein so alter Bucket ist ohnehin wieder voll.
    pub fn cleanup(&self) {
        let schwellwert = Duration::from_secs(5 * 60);
        let jetzt = Instant::now();
        self.buckets
            .lock()
            .retain(|_, b| jetzt.saturating_duration_since(b.letzte_auffuellung) < schwellwert);
    }

    pub fn anzahl(&self) -> usize {
        self.buckets.lock().len()
    }
}
