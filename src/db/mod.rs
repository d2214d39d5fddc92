//! Connection plumbing for the deployed document store.
//!
//! The console does not own the schema it mutates; `collections` names the
//! parts of it the operations touch so the strings live in exactly one place.

use std::time::Duration;

use mongodb::bson::doc;
use mongodb::options::{ClientOptions, Credential, ServerAddress};
use mongodb::{Client, Collection, Database};

use crate::config::{DbSettings, DATABASE_NAME};
use crate::AppResult;

pub mod validator;

/// Collection names in the managed database.
pub mod collections {
    pub const PESSOAS: &str = "Pessoas";
    pub const PRODUTOS_SERVICOS: &str = "ProdutosServicos";
    pub const PRODUTOS_SERVICOS_EMPRESA: &str = "ProdutosServicosEmpresa";
    pub const ESTOQUES: &str = "Estoques";
    pub const TRIBUTACOES_ESTADUAL: &str = "TributacoesEstadual";
    pub const TRIBUTACOES_FEDERAL: &str = "TributacoesFederal";
    pub const MOVIMENTACOES: &str = "Movimentacoes";
    pub const RECEBIMENTOS: &str = "Recebimentos";
    pub const TURNOS_LANCAMENTOS: &str = "TurnosLancamentos";
    pub const CONFIGURACOES_SERVIDOR: &str = "ConfiguracoesServidor";
}

const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_POOL_SIZE: u32 = 50;

/// A client plus the fixed database it serves.
pub struct Connection {
    client: Client,
    database: Database,
}

impl Connection {
    /// Build a client from the supplied credentials. Credentials go through
    /// the driver's `Credential` type, so no URI escaping is involved.
    pub fn connect(settings: &DbSettings) -> AppResult<Self> {
        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: settings.host.clone(),
                port: Some(settings.port),
            }])
            .credential(
                Credential::builder()
                    .username(settings.user.clone())
                    .password(settings.password.clone())
                    .build(),
            )
            .server_selection_timeout(SERVER_SELECTION_TIMEOUT)
            .max_pool_size(MAX_POOL_SIZE)
            .app_name("digimaint".to_string())
            .build();

        let client = Client::with_options(options)?;
        let database = client.database(DATABASE_NAME);
        Ok(Connection { client, database })
    }

    /// Round-trip a `ping` to verify the server is actually reachable; the
    /// client construction above never touches the network.
    pub async fn ping(&self) -> AppResult<()> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn collection(&self, name: &str) -> Collection<mongodb::bson::Document> {
        self.database.collection(name)
    }

    pub async fn disconnect(self) {
        self.client.shutdown().await;
    }
}
