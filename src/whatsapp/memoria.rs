use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use log::{debug, info};
use uuid::Uuid;

use crate::llm::ChatMessage;

const MAX_TURNOS: usize = 20;
const TTL: Duration = Duration::from_secs(15 * 60);
pub const INTERVALO_BARRIDO: Duration = Duration::from_secs(5 * 60);

struct Conversacion {
    mensajes: Vec<ChatMessage>,
    tenant_id: Uuid,
    ultima_actividad: Instant,
}

/// Memoria conversacional por telefono, local al proceso y no durable.
/// Un reinicio pierde las recolecciones en curso; el prompt le pide al
/// modelo retomar la conversacion cuando el cliente repregunta.
pub struct MemoriaConversaciones {
    conversaciones: RwLock<HashMap<String, Conversacion>>,
}

impl Default for MemoriaConversaciones {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoriaConversaciones {
    pub fn new() -> Self {
        Self {
            conversaciones: RwLock::new(HashMap::new()),
        }
    }

    /// Registra un turno (mensaje y respuesta opcional) y devuelve el poll
    /// completo. Conserva solo los ultimos 20 mensajes.
    pub fn registrar_turno(
        &self,
        telefono: &str,
        tenant_id: Uuid,
        usuario: ChatMessage,
        asistente: Option<ChatMessage>,
    ) {
        let mut guard = self.conversaciones.write().unwrap_or_else(|e| e.into_inner());
        let conv = guard
            .entry(telefono.to_string())
            .or_insert_with(|| Conversacion {
                mensajes: Vec::new(),
                tenant_id,
                ultima_actividad: Instant::now(),
            });
        conv.tenant_id = tenant_id;
        conv.mensajes.push(usuario);
        if let Some(m) = asistente {
            conv.mensajes.push(m);
        }
        if conv.mensajes.len() > MAX_TURNOS {
            let sobran = conv.mensajes.len() - MAX_TURNOS;
            conv.mensajes.drain(..sobran);
        }
        conv.ultima_actividad = Instant::now();
    }

    /// Historial actual del telefono, si existe y no expiro.
    pub fn historial(&self, telefono: &str) -> Vec<ChatMessage> {
        let guard = self.conversaciones.read().unwrap_or_else(|e| e.into_inner());
        match guard.get(telefono) {
            Some(c) if c.ultima_actividad.elapsed() < TTL => c.mensajes.clone(),
            _ => Vec::new(),
        }
    }

    pub fn tenant_de(&self, telefono: &str) -> Option<Uuid> {
        let guard = self.conversaciones.read().unwrap_or_else(|e| e.into_inner());
        guard
            .get(telefono)
            .filter(|c| c.ultima_actividad.elapsed() < TTL)
            .map(|c| c.tenant_id)
    }

    pub fn olvidar(&self, telefono: &str) {
        let mut guard = self.conversaciones.write().unwrap_or_else(|e| e.into_inner());
        guard.remove(telefono);
    }

    /// Elimina conversaciones sin actividad por mas de 15 minutos. El lazo
    /// de barrido lo llama cada 5 minutos.
    pub fn barrer_expiradas(&self) -> usize {
        let mut guard = self.conversaciones.write().unwrap_or_else(|e| e.into_inner());
        let antes = guard.len();
        guard.retain(|_, c| c.ultima_actividad.elapsed() < TTL);
        let eliminadas = antes - guard.len();
        if eliminadas > 0 {
            info!("memoria whatsapp: {} conversaciones expiradas", eliminadas);
        } else {
            debug!("memoria whatsapp: barrido sin expiraciones ({} activas)", antes);
        }
        eliminadas
    }

    #[cfg(test)]
    fn envejecer(&self, telefono: &str, hace: Duration) {
        let mut guard = self.conversaciones.write().unwrap();
        if let Some(c) = guard.get_mut(telefono) {
            c.ultima_actividad = Instant::now() - hace;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conserva_solo_los_ultimos_veinte() {
        let memoria = MemoriaConversaciones::new();
        let tenant = Uuid::new_v4();
        for i in 0..15 {
            memoria.registrar_turno(
                "51999",
                tenant,
                ChatMessage::user(format!("pregunta {i}")),
                Some(ChatMessage::assistant(format!("respuesta {i}"))),
            );
        }
        let historial = memoria.historial("51999");
        assert_eq!(historial.len(), MAX_TURNOS);
        // sobreviven los mas recientes
        assert_eq!(historial.last().unwrap().content, "respuesta 14");
        assert_eq!(historial.first().unwrap().content, "pregunta 5");
    }

    #[test]
    fn expiracion_por_inactividad() {
        let memoria = MemoriaConversaciones::new();
        let tenant = Uuid::new_v4();
        memoria.registrar_turno("51888", tenant, ChatMessage::user("hola"), None);
        assert_eq!(memoria.tenant_de("51888"), Some(tenant));

        memoria.envejecer("51888", Duration::from_secs(16 * 60));
        assert!(memoria.historial("51888").is_empty());
        assert_eq!(memoria.tenant_de("51888"), None);
        assert_eq!(memoria.barrer_expiradas(), 1);
    }

    #[test]
    fn telefonos_independientes() {
        let memoria = MemoriaConversaciones::new();
        memoria.registrar_turno("a", Uuid::new_v4(), ChatMessage::user("x"), None);
        memoria.registrar_turno("b", Uuid::new_v4(), ChatMessage::user("y"), None);
        memoria.olvidar("a");
        assert!(memoria.historial("a").is_empty());
        assert_eq!(memoria.historial("b").len(), 1);
    }
}
