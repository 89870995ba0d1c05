pub mod batch;
pub mod cnpj;
pub mod job;
pub mod lookup;
