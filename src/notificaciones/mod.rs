use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{error, info, warn};

use crate::config::SmtpConfig;
use crate::shared::models::Reclamo;

/// SMTP saliente. Todos los envios son best-effort: un fallo se loguea y
/// nunca interrumpe el request que lo origino.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl Mailer {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)?.port(cfg.port);
        if !cfg.user.is_empty() {
            builder = builder.credentials(Credentials::new(cfg.user.clone(), cfg.pass.clone()));
        }
        let from: Mailbox = cfg
            .from
            .parse()
            .map_err(|e| anyhow::anyhow!("SMTP_FROM invalido: {e}"))?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    async fn enviar(&self, destino: &str, asunto: &str, cuerpo: String) {
        let destino_mb: Mailbox = match destino.parse() {
            Ok(mb) => mb,
            Err(e) => {
                warn!("email de destino invalido {}: {}", destino, e);
                return;
            }
        };
        let mensaje = Message::builder()
            .from(self.from.clone())
            .to(destino_mb)
            .subject(asunto)
            .header(ContentType::TEXT_PLAIN)
            .body(cuerpo);
        let mensaje = match mensaje {
            Ok(m) => m,
            Err(e) => {
                warn!("no se pudo construir el correo para {}: {}", destino, e);
                return;
            }
        };
        match self.transport.send(mensaje).await {
            Ok(_) => info!("correo enviado a {}: {}", destino, asunto),
            Err(e) => error!("fallo SMTP hacia {}: {}", destino, e),
        }
    }

    /// Confirmacion al consumidor que registro el reclamo.
    pub async fn confirmacion_cliente(&self, reclamo: &Reclamo) {
        let cuerpo = format!(
            "Hola {},\n\n\
             Tu {} fue registrado en el Libro de Reclamaciones de {}.\n\n\
             Codigo de seguimiento: {}\n\
             Fecha de registro: {}\n\
             Fecha limite de respuesta: {}\n\n\
             Conserva este codigo para consultar el estado de tu caso.\n",
            reclamo.nombre_completo,
            reclamo.tipo.to_lowercase(),
            reclamo.razon_social_proveedor,
            reclamo.codigo,
            reclamo.fecha_registro.format("%d/%m/%Y %H:%M"),
            reclamo.fecha_limite_respuesta.format("%d/%m/%Y"),
        );
        self.enviar(
            &reclamo.email,
            &format!("Reclamo registrado: {}", reclamo.codigo),
            cuerpo,
        )
        .await;
    }

    /// Aviso interno a la empresa cuando entra un reclamo nuevo.
    pub async fn aviso_empresa(&self, email_contacto: &str, reclamo: &Reclamo) {
        let cuerpo = format!(
            "Nuevo {} registrado.\n\n\
             Codigo: {}\n\
             Consumidor: {} ({} {})\n\
             Descripcion: {}\n\n\
             Fecha limite de respuesta: {}\n",
            reclamo.tipo.to_lowercase(),
            reclamo.codigo,
            reclamo.nombre_completo,
            reclamo.tipo_documento,
            reclamo.numero_documento,
            reclamo.descripcion,
            reclamo.fecha_limite_respuesta.format("%d/%m/%Y"),
        );
        self.enviar(
            email_contacto,
            &format!("Nuevo reclamo: {}", reclamo.codigo),
            cuerpo,
        )
        .await;
    }

    /// Aviso al consumidor cuando la empresa publica su respuesta.
    pub async fn respuesta_publicada(&self, reclamo: &Reclamo, respuesta: &str) {
        let cuerpo = format!(
            "Hola {},\n\n\
             {} respondio a tu reclamo {}:\n\n\
             {}\n\n\
             Puedes revisar el detalle con tu codigo de seguimiento.\n",
            reclamo.nombre_completo,
            reclamo.razon_social_proveedor,
            reclamo.codigo,
            respuesta,
        );
        self.enviar(
            &reclamo.email,
            &format!("Respuesta a tu reclamo {}", reclamo.codigo),
            cuerpo,
        )
        .await;
    }
}
