mod helpers;
mod instances;
mod orders;
mod tips;
