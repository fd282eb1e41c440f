//! raumfunk-server – Bibliotheks-Root
//!
//! Verdrahtet Zonen-Dienst, Aufraeumer und Status-API und stellt den
//! Einstiegspunkt fuer Integrationstests bereit.

pub mod config;

use anyhow::{Context, Result};
use config::ServerConfig;
use raumfunk_observability::RaumfunkMetrics;
use raumfunk_signaling::{aufraeumer_starten, api_router, SignalingServer, SignalingState};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Haelt Konfiguration und gemeinsamen Dienst-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    state: Arc<SignalingState>,
}

impl Server {
    /// Erstellt den Dienst-Zustand aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Result<Self> {
        let metriken = RaumfunkMetrics::neu()?;
        let state = SignalingState::neu(config.signaling_config(), metriken);
        Ok(Self { config, state })
    }

    pub fn state(&self) -> &Arc<SignalingState> {
        &self.state
    }

    /// Bindet Zonen-Port und (falls aktiviert) API-Port
    pub async fn binden(self) -> Result<GebundenerServer> {
        let tcp_addr: SocketAddr = self
            .config
            .tcp_bind_adresse()
            .parse()
            .with_context(|| format!("Ungueltige Bind-Adresse '{}'", self.config.tcp_bind_adresse()))?;
        let tcp = SignalingServer::binden(Arc::clone(&self.state), tcp_addr)
            .await
            .with_context(|| format!("Zonen-Port {tcp_addr} nicht bindbar"))?;

        let api = if self.config.observability.aktiviert {
            let adresse = self.config.api_bind_adresse();
            let listener = TcpListener::bind(&adresse)
                .await
                .with_context(|| format!("API-Port {adresse} nicht bindbar"))?;
            Some(listener)
        } else {
            None
        };

        Ok(GebundenerServer {
            name: self.config.server.name,
            state: self.state,
            tcp,
            api,
        })
    }

    /// Startet alle Subsysteme und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let gebunden = self.binden().await?;
        gebunden
            .laufen(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(fehler = %e, "Ctrl-C-Handler nicht verfuegbar");
                    std::future::pending::<()>().await;
                }
            })
            .await
    }
}

/// Dienst mit gebundenen Listenern, bereit zum Laufen
pub struct GebundenerServer {
    name: String,
    state: Arc<SignalingState>,
    tcp: SignalingServer,
    api: Option<TcpListener>,
}

impl GebundenerServer {
    pub fn tcp_adresse(&self) -> std::io::Result<SocketAddr> {
        self.tcp.lokale_adresse()
    }

    pub fn api_adresse(&self) -> Option<SocketAddr> {
        self.api.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Laeuft, bis `shutdown` fertig ist, und faehrt dann alle Tasks herunter
    pub async fn laufen(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(
            server_name = %self.name,
            tcp = ?self.tcp.lokale_adresse().ok(),
            api = ?self.api.as_ref().and_then(|l| l.local_addr().ok()),
            "Server startet"
        );

        let tcp_task = tokio::spawn(self.tcp.starten(shutdown_rx.clone()));
        let aufraeumer = aufraeumer_starten(Arc::clone(&self.state), shutdown_rx.clone());

        let api_task = self.api.map(|listener| {
            let router = api_router(Arc::clone(&self.state));
            let mut rx = shutdown_rx.clone();
            tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = rx.wait_for(|beendet| *beendet).await;
                    })
                    .await
            })
        });

        shutdown.await;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
        let _ = shutdown_tx.send(true);

        tcp_task.await?.context("Zonen-Listener fehlgeschlagen")?;
        aufraeumer.await?;
        if let Some(api_task) = api_task {
            api_task.await?.context("Status-API fehlgeschlagen")?;
        }

        tracing::info!("Server beendet");
        Ok(())
    }
}
