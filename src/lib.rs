pub mod asesores;
pub mod asistente;
pub mod auth;
pub mod chatbots;
pub mod config;
pub mod dashboard;
pub mod llm;
pub mod notificaciones;
pub mod planes;
pub mod reclamos;
pub mod sedes;
pub mod shared;
pub mod suscripciones;
pub mod tenants;
pub mod usuarios;
pub mod whatsapp;
